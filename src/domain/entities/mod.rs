pub mod decision;
pub mod position;
pub mod trade;
pub mod venue;
