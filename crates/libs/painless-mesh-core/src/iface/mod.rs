//! Traits for the external collaborators the mesh core talks to but does
//! not own: a WiFi radio, a DNS resolver, an HTTP client, and a
//! filesystem. Spec §6 places all of these "out of scope"; we still need
//! a seam to depend on so the rest of the crate is testable without
//! hardware. Production embedders implement these against their SDK;
//! [`sim`] supplies deterministic test doubles.

pub mod fs;
pub mod net_ext;
pub mod sim;
pub mod wifi;

pub use fs::{FileStore, TokioFileStore};
pub use net_ext::{DnsResolver, HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use wifi::{AccessPoint, StationStatus, WifiDriver, WifiMode};
