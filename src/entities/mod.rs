pub mod order;
pub mod order_line_item;
