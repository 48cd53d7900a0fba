//! Outer surfaces of pagegist: the HTTP service and the pieces the `pagegist` binary shares
//! with it.

pub mod server;
