//! mdrived emulates a bank of Sinclair Microdrive cartridges for the ZX
//! Spectrum (with Interface 1) and the Sinclair QL, in cooperation with a
//! hardware adapter attached over a serial link.
//!
//! The daemon keeps eight virtual drive slots with in-memory cartridge
//! images. The adapter streams raw encoded sector data to and from the
//! host computer; the daemon persists modifications, synthesizes missing
//! data when mirroring real drives, and serves a management API.
//!
//! * [conduit] - serial framing and synchronization
//! * [daemon] - slot table and command dispatch
//! * [api] - the HTTP control surface
//! * [repo] - cartridge repository with a search index
//!
//! The cartridge data model lives in the `mdrived-core` crate, file
//! formats and the snapshot packer in `mdrived-formats`.

pub mod api;
pub mod conduit;
pub mod daemon;
pub mod repo;
