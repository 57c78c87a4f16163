pub use bitflags;
pub use bytemuck;
pub use glam;
pub use indicatif;
pub use lazy_static;
pub use log;
pub use num_cpus;
pub use parking_lot;
pub use rand;
pub use rayon;
pub use rayon::prelude::*;
pub use serde_json;
pub use smallvec;
pub use statrs;
pub extern crate serde;
