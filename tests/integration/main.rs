//! Integration test modules.

mod backend_mock;
