//! Test modules for modcall-http-server
//!
//! End-to-end tests drive a real listener bound to port 0 with `reqwest`.

pub mod listener_tests;
