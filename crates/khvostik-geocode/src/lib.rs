//! Free-text address to coordinate resolution.
//!
//! An ordered list of query variants is tried against an external geocoder
//! (Nominatim in production). If none of them yields a usable candidate the
//! address is matched against a small built-in gazetteer of local
//! settlements, which produces an approximate hit.

pub mod gazetteer;
pub mod lookup;
pub mod resolver;

pub use lookup::{Candidate, GeoLookup, NominatimLookup};
pub use resolver::{AddressResolver, ResolveError, ResolvedAddress, ResolverConfig, Source};
