pub mod webpay;
