// ********* Configuration **********

/// How a single winner is picked among candidates sharing the top count.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum TieBreakMode {
    /// The earliest submitted application wins (lowest created_at, then
    /// lowest id).
    EarliestApplication,
    /// A permutation that is hard to guess in advance but reproducible from
    /// the seed. Uses a cryptographic hash of the seed, the voting event and
    /// the application.
    Random(u32),
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ElectionRules {
    pub tiebreak_mode: TieBreakMode,
}

impl ElectionRules {
    pub const DEFAULT_RULES: ElectionRules = ElectionRules {
        tiebreak_mode: TieBreakMode::EarliestApplication,
    };
}

impl Default for ElectionRules {
    fn default() -> Self {
        ElectionRules::DEFAULT_RULES
    }
}
