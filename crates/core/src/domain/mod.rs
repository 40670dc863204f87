pub mod part;
pub mod quote;
pub mod service;
pub mod token;
pub mod work_order;
