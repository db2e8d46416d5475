pub mod fanout;
pub mod master;

pub use fanout::fan_out;
pub use master::Master;
