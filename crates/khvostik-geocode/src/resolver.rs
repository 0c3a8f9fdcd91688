use std::sync::Arc;

use tracing::{debug, info};

use crate::gazetteer;
use crate::lookup::GeoLookup;

/// Where a resolved coordinate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The external geocoder returned it.
    External,
    /// Approximate: the built-in gazetteer matched a settlement name.
    Gazetteer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAddress {
    pub latitude: f64,
    pub longitude: f64,
    /// Canonical place name (geocoder display name or gazetteer name).
    pub location: String,
    pub source: Source,
}

impl ResolvedAddress {
    /// True only for externally verified results.
    pub fn found(&self) -> bool {
        self.source == Source::External
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("address is empty")]
    EmptyAddress,
}

/// Qualifiers appended to the address when building query variants.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub region: String,
    pub country: String,
    /// Settlement-type words tried as prefixes, in order.
    pub settlement_words: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            region: "Краснодарский край".into(),
            country: "Россия".into(),
            settlement_words: ["станция", "станица", "село", "хутор", "посёлок"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Turns a free-text address into coordinates.
#[derive(Clone)]
pub struct AddressResolver {
    lookup: Arc<dyn GeoLookup>,
    config: ResolverConfig,
}

impl AddressResolver {
    pub fn new(lookup: Arc<dyn GeoLookup>, config: ResolverConfig) -> Self {
        Self { lookup, config }
    }

    /// Tries every query variant against the external lookup in order, then
    /// falls back to the gazetteer. `Ok(None)` means neither knew the place.
    pub async fn resolve(&self, address: &str) -> Result<Option<ResolvedAddress>, ResolveError> {
        let normalized = normalize(address);
        if normalized.is_empty() {
            return Err(ResolveError::EmptyAddress);
        }

        for query in self.variants(&normalized) {
            let candidates = match self.lookup.search(&query).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    debug!("Geocoder failed for '{}': {:#}", query, e);
                    continue;
                }
            };

            let Some(first) = candidates.first() else {
                debug!("Geocoder has no candidates for '{}'", query);
                continue;
            };

            let Some((latitude, longitude)) = first.coordinates() else {
                debug!(
                    "Geocoder candidate for '{}' has unusable coordinates ({:?}, {:?})",
                    query, first.lat, first.lon
                );
                continue;
            };

            info!("Resolved '{}' via geocoder query '{}'", normalized, query);
            let location = if first.display_name.is_empty() {
                normalized.clone()
            } else {
                first.display_name.clone()
            };
            return Ok(Some(ResolvedAddress {
                latitude,
                longitude,
                location,
                source: Source::External,
            }));
        }

        if let Some(entry) = gazetteer::find(&normalized) {
            info!("Resolved '{}' via gazetteer entry {}", normalized, entry.name);
            return Ok(Some(ResolvedAddress {
                latitude: entry.latitude,
                longitude: entry.longitude,
                location: entry.name.to_string(),
                source: Source::Gazetteer,
            }));
        }

        info!("Could not resolve '{}'", normalized);
        Ok(None)
    }

    /// Query variants, most specific first.
    pub fn variants(&self, normalized: &str) -> Vec<String> {
        let ResolverConfig {
            region,
            country,
            settlement_words,
        } = &self.config;

        let mut variants = vec![
            normalized.to_string(),
            format!("{normalized}, {region}, {country}"),
            format!("{normalized}, {country}"),
        ];
        variants.extend(
            settlement_words
                .iter()
                .map(|word| format!("{word} {normalized}, {region}, {country}")),
        );
        variants
    }
}

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize(address: &str) -> String {
    address.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;

    use super::*;
    use crate::lookup::Candidate;

    enum Reply {
        Fail,
        Candidates(Vec<Candidate>),
    }

    /// Replies from a script keyed by exact query; unscripted queries get
    /// `fallback`. Records every query it sees.
    struct ScriptedLookup {
        script: HashMap<String, Reply>,
        fallback_fails: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLookup {
        fn unreachable() -> Self {
            Self {
                script: HashMap::new(),
                fallback_fails: true,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn empty() -> Self {
            Self {
                fallback_fails: false,
                ..Self::unreachable()
            }
        }

        fn reply(mut self, query: &str, reply: Reply) -> Self {
            self.script.insert(query.to_string(), reply);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GeoLookup for ScriptedLookup {
        async fn search(&self, query: &str) -> Result<Vec<Candidate>> {
            self.calls.lock().unwrap().push(query.to_string());
            match self.script.get(query) {
                Some(Reply::Fail) => Err(anyhow!("connection refused")),
                Some(Reply::Candidates(c)) => Ok(c.clone()),
                None if self.fallback_fails => Err(anyhow!("connection refused")),
                None => Ok(vec![]),
            }
        }
    }

    fn candidate(lat: &str, lon: &str, name: &str) -> Candidate {
        Candidate {
            lat: lat.to_string(),
            lon: lon.to_string(),
            display_name: name.to_string(),
        }
    }

    fn resolver(lookup: ScriptedLookup) -> (AddressResolver, Arc<ScriptedLookup>) {
        let lookup = Arc::new(lookup);
        (AddressResolver::new(lookup.clone(), ResolverConfig::default()), lookup)
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  ул.   Мира \t 5\n"), "ул. Мира 5");
        assert_eq!(normalize(" \n "), "");
    }

    #[test]
    fn variants_go_from_specific_to_prefixed() {
        let (resolver, _) = resolver(ScriptedLookup::empty());
        let variants = resolver.variants("Джигинка");
        assert_eq!(variants[0], "Джигинка");
        assert_eq!(variants[1], "Джигинка, Краснодарский край, Россия");
        assert_eq!(variants[2], "Джигинка, Россия");
        assert_eq!(variants[3], "станция Джигинка, Краснодарский край, Россия");
        assert_eq!(variants.last().unwrap(), "посёлок Джигинка, Краснодарский край, Россия");
        assert_eq!(variants.len(), 8);
    }

    #[tokio::test]
    async fn unreachable_geocoder_falls_back_to_gazetteer() {
        let (resolver, lookup) = resolver(ScriptedLookup::unreachable());
        let hit = resolver.resolve("Анапа").await.unwrap().unwrap();
        assert_eq!((hit.latitude, hit.longitude), (44.8951, 37.3142));
        assert!(!hit.found());
        // every variant was attempted before giving up on the geocoder
        assert_eq!(lookup.calls().len(), 8);
    }

    #[tokio::test]
    async fn gazetteer_hit_for_stanitsa() {
        let (resolver, _) = resolver(ScriptedLookup::empty());
        let hit = resolver.resolve("Гостагаевская").await.unwrap().unwrap();
        assert_eq!((hit.latitude, hit.longitude), (45.02063, 37.50175));
        assert_eq!(hit.source, Source::Gazetteer);
    }

    #[tokio::test]
    async fn gazetteer_ignores_case() {
        for address in ["АНАПА", "анапа", "  Анапа  "] {
            let (resolver, _) = resolver(ScriptedLookup::unreachable());
            let hit = resolver.resolve(address).await.unwrap().unwrap();
            assert_eq!((hit.latitude, hit.longitude), (44.8951, 37.3142));
            assert!(!hit.found());
        }
    }

    #[tokio::test]
    async fn external_candidate_wins_and_stops() {
        let lookup = ScriptedLookup::empty().reply(
            "ул. Лесная 7",
            Reply::Candidates(vec![candidate("45.1234", "37.5678", "Лесная улица")]),
        );
        let (resolver, lookup) = resolver(lookup);

        let hit = resolver.resolve("ул. Лесная 7").await.unwrap().unwrap();
        assert_eq!((hit.latitude, hit.longitude), (45.1234, 37.5678));
        assert!(hit.found());
        assert_eq!(hit.location, "Лесная улица");
        assert_eq!(lookup.calls(), vec!["ул. Лесная 7"]);
    }

    #[tokio::test]
    async fn external_hit_beats_gazetteer_match() {
        let lookup = ScriptedLookup::empty().reply(
            "Анапа",
            Reply::Candidates(vec![candidate("44.9", "37.3", "Анапа, Россия")]),
        );
        let (resolver, _) = resolver(lookup);

        let hit = resolver.resolve("Анапа").await.unwrap().unwrap();
        assert_eq!((hit.latitude, hit.longitude), (44.9, 37.3));
        assert!(hit.found());
    }

    #[tokio::test]
    async fn failures_fall_through_to_later_variants() {
        let lookup = ScriptedLookup::empty()
            .reply("Сенной", Reply::Fail)
            .reply("Сенной, Краснодарский край, Россия", Reply::Candidates(vec![]))
            .reply(
                "Сенной, Россия",
                Reply::Candidates(vec![candidate("not-a-number", "37.0", "")]),
            )
            .reply(
                "станция Сенной, Краснодарский край, Россия",
                Reply::Candidates(vec![candidate("45.2861", "36.9903", "")]),
            );
        let (resolver, lookup) = resolver(lookup);

        let hit = resolver.resolve("Сенной").await.unwrap().unwrap();
        assert_eq!((hit.latitude, hit.longitude), (45.2861, 36.9903));
        assert!(hit.found());
        // an empty display name falls back to the normalized input
        assert_eq!(hit.location, "Сенной");
        assert_eq!(lookup.calls().len(), 4);
    }

    #[tokio::test]
    async fn unknown_everywhere_is_not_found() {
        let (resolver, _) = resolver(ScriptedLookup::unreachable());
        assert_eq!(resolver.resolve("Нигдеград").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_address_never_reaches_the_geocoder() {
        let (resolver, lookup) = resolver(ScriptedLookup::unreachable());
        assert_eq!(resolver.resolve("   ").await, Err(ResolveError::EmptyAddress));
        assert!(lookup.calls().is_empty());
    }

    #[tokio::test]
    async fn same_answers_give_same_coordinates() {
        let lookup = ScriptedLookup::empty().reply(
            "Витязево, Россия",
            Reply::Candidates(vec![candidate("45.05", "37.27", "Витязево")]),
        );
        let (resolver, _) = resolver(lookup);

        let first = resolver.resolve("Витязево").await.unwrap();
        let second = resolver.resolve("Витязево").await.unwrap();
        assert_eq!(first, second);
        assert!(first.unwrap().found());
    }
}
