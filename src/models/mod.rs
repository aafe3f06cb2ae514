mod app_purchase;
mod contribution;
mod inapp;
mod refund;
mod user;
mod webapp;

pub use app_purchase::*;
pub use contribution::*;
pub use inapp::*;
pub use refund::*;
pub use user::*;
pub use webapp::*;
