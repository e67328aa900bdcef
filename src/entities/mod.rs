pub mod order;
pub mod order_item;
pub mod pack_assignment;
pub mod pick_list_entry;
pub mod product;
pub mod stock_movement;
pub mod warehouse_session;
