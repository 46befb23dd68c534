// Crate entry point. Re-export modules so tests and binaries can import them easily.
//
// Responsibilities
// - Only declare and expose modules. No business logic here.
//
// How it is used
// - Tests import modules from this crate root to reach the code under test.

pub mod core {
    pub mod event;
    pub mod invariant;
    pub mod ports;
    pub mod reservation;
}

pub mod application {
    pub mod checker;
    pub mod errors;
    pub mod reservations;
}

pub mod adapters {
    pub mod esdb {
        pub mod esdb_event_store;
    }
    pub mod in_memory {
        pub mod in_memory_event_store;
    }
}
