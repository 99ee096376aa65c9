pub mod order;
pub mod order_status;
pub mod totals;

pub use order::{Address, LineItem, Order, OrderDraft, StatusTransition};
pub use order_status::{OrderStatus, PaymentOutcome};
pub use totals::OrderTotals;
