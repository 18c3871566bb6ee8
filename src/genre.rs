use std::collections::HashMap;
use std::sync::OnceLock;

/// Genre families drive transition length: continuous club genres sustain
/// long blends, discrete-phrase genres need short cuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenreFamily {
    /// House/techno/trance lineage: steady four-on-the-floor, long blends.
    ContinuousElectronic,
    /// Breakbeat-driven: drum & bass, jungle, breaks.
    Breaks,
    /// Discrete phrase structure: hip hop, R&B, pop, reggae.
    DiscretePhrase,
    /// Beatless or loosely gridded: ambient, downtempo, dub.
    Atmospheric,
    Other,
}

impl GenreFamily {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ContinuousElectronic => "continuous_electronic",
            Self::Breaks => "breaks",
            Self::DiscretePhrase => "discrete_phrase",
            Self::Atmospheric => "atmospheric",
            Self::Other => "other",
        }
    }

    /// Crossfade length in bars for transitions into a track of this family.
    pub const fn transition_bars(&self) -> u32 {
        match self {
            Self::ContinuousElectronic => 16,
            Self::Breaks => 8,
            Self::DiscretePhrase => 4,
            Self::Atmospheric => 8,
            Self::Other => 8,
        }
    }
}

/// Canonical genre -> family. Keys are lowercase, sorted alphabetically.
const FAMILIES: &[(&str, GenreFamily)] = &[
    ("acid", GenreFamily::ContinuousElectronic),
    ("afro house", GenreFamily::ContinuousElectronic),
    ("ambient", GenreFamily::Atmospheric),
    ("ambient techno", GenreFamily::Atmospheric),
    ("bassline", GenreFamily::ContinuousElectronic),
    ("breakbeat", GenreFamily::Breaks),
    ("broken beat", GenreFamily::Breaks),
    ("dancehall", GenreFamily::DiscretePhrase),
    ("deep house", GenreFamily::ContinuousElectronic),
    ("deep techno", GenreFamily::ContinuousElectronic),
    ("disco", GenreFamily::ContinuousElectronic),
    ("downtempo", GenreFamily::Atmospheric),
    ("drum & bass", GenreFamily::Breaks),
    ("dub", GenreFamily::Atmospheric),
    ("dub techno", GenreFamily::ContinuousElectronic),
    ("dubstep", GenreFamily::Breaks),
    ("electro", GenreFamily::ContinuousElectronic),
    ("garage", GenreFamily::ContinuousElectronic),
    ("grime", GenreFamily::DiscretePhrase),
    ("hard techno", GenreFamily::ContinuousElectronic),
    ("hip hop", GenreFamily::DiscretePhrase),
    ("house", GenreFamily::ContinuousElectronic),
    ("idm", GenreFamily::Breaks),
    ("jungle", GenreFamily::Breaks),
    ("minimal", GenreFamily::ContinuousElectronic),
    ("pop", GenreFamily::DiscretePhrase),
    ("progressive house", GenreFamily::ContinuousElectronic),
    ("psytrance", GenreFamily::ContinuousElectronic),
    ("r&b", GenreFamily::DiscretePhrase),
    ("reggae", GenreFamily::DiscretePhrase),
    ("speed garage", GenreFamily::ContinuousElectronic),
    ("tech house", GenreFamily::ContinuousElectronic),
    ("techno", GenreFamily::ContinuousElectronic),
    ("trance", GenreFamily::ContinuousElectronic),
    ("uk bass", GenreFamily::Breaks),
];

/// Aliases mapping common tag spellings to canonical genres. Lowercase keys,
/// sorted alphabetically.
const ALIASES: &[(&str, &str)] = &[
    ("d&b", "drum & bass"),
    ("dnb", "drum & bass"),
    ("drum and bass", "drum & bass"),
    ("hip-hop", "hip hop"),
    ("hiphop", "hip hop"),
    ("melodic house & techno", "deep techno"),
    ("minimal / deep tech", "minimal"),
    ("r & b", "r&b"),
    ("rap", "hip hop"),
    ("rnb", "r&b"),
    ("techno (peak time / driving)", "techno"),
    ("techno (raw / deep / hypnotic)", "deep techno"),
    ("uk garage", "garage"),
];

fn family_map() -> &'static HashMap<&'static str, GenreFamily> {
    static MAP: OnceLock<HashMap<&'static str, GenreFamily>> = OnceLock::new();
    MAP.get_or_init(|| FAMILIES.iter().copied().collect())
}

fn alias_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| ALIASES.iter().copied().collect())
}

/// Resolve a raw genre tag to its family. Unknown or empty genres fall back
/// to `Other` rather than failing.
pub fn genre_family(raw_genre: &str) -> GenreFamily {
    let lowered = raw_genre.trim().to_lowercase();
    if lowered.is_empty() {
        return GenreFamily::Other;
    }
    let canonical: &str = match alias_map().get(lowered.as_str()) {
        Some(c) => c,
        None => &lowered,
    };
    family_map()
        .get(canonical)
        .copied()
        .unwrap_or(GenreFamily::Other)
}
