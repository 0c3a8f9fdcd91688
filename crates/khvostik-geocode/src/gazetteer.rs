/// A settlement with fixed coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazetteerEntry {
    /// Folded form matched against the address (see [`fold`]).
    pub key: &'static str,
    /// Human-readable place name returned to callers.
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

/// Matched in order, first hit wins.
pub static ENTRIES: &[GazetteerEntry] = &[
    GazetteerEntry { key: "гостагаевская", name: "Гостагаевская", latitude: 45.02063, longitude: 37.50175 },
    GazetteerEntry { key: "анапская", name: "Анапская", latitude: 44.8920, longitude: 37.3790 },
    GazetteerEntry { key: "анапа", name: "Анапа", latitude: 44.8951, longitude: 37.3142 },
    GazetteerEntry { key: "витязево", name: "Витязево", latitude: 45.0544, longitude: 37.2728 },
    GazetteerEntry { key: "джигинка", name: "Джигинка", latitude: 45.1367, longitude: 37.3375 },
    GazetteerEntry { key: "благовещенская", name: "Благовещенская", latitude: 45.0596, longitude: 37.1316 },
    GazetteerEntry { key: "варениковская", name: "Варениковская", latitude: 45.1203, longitude: 37.6333 },
    GazetteerEntry { key: "сукко", name: "Сукко", latitude: 44.7964, longitude: 37.4219 },
];

/// Lower-case and fold `ё` into `е`, the way people type Russian place names.
pub fn fold(s: &str) -> String {
    s.to_lowercase().replace('ё', "е")
}

/// First entry whose key occurs anywhere in the address.
pub fn find(address: &str) -> Option<&'static GazetteerEntry> {
    let folded = fold(address);
    ENTRIES.iter().find(|entry| folded.contains(entry.key))
}
