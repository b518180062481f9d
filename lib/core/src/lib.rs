//! Node-side domain logic: clock synchronization, leader/key bookkeeping,
//! trajectory-driven location, the NIC/Protocol/Communicator network stack, and
//! the RSU-anchored and peer-discovery leader models built on top of it.

pub mod address;
pub mod clock;
pub mod framework;
pub mod leader_key_storage;
pub mod location_service;
pub mod net;
pub mod observer;
pub mod periodic;

pub use address::ProtocolAddress;
pub use clock::Clock;
pub use leader_key_storage::LeaderKeyStorage;
pub use location_service::LocationService;
pub use periodic::PeriodicTask;
