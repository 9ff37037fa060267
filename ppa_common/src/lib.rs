mod money;

pub use money::{MoneyError, MoneyValue};
pub use rust_decimal::Decimal;
