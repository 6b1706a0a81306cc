// Domain layer: listing model, target set, and the ports implemented by adapters and storage.

pub mod model;
pub mod ports;
