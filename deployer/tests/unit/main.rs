//! Unit tests against the public API

mod test_fsm;
