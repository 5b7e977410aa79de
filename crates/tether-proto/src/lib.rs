//! Generated gRPC protocol definitions for the tether app callback channel.

pub mod tether {
    pub mod v1 {
        tonic::include_proto!("tether.v1");
    }
}

// Re-export commonly used types at the crate root for convenience
pub use tether::v1::*;
