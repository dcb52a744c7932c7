pub mod error;
pub mod nominatim;
pub mod overpass;
pub mod types;

pub use error::{OsmError, Result};
pub use nominatim::NominatimClient;
pub use overpass::OverpassClient;
pub use types::{Element, LatLon, StreetPair, TaggedNode, TaggedWay, Tags};
