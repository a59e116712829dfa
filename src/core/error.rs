use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Live cell population reached `cell_limit - 1`. Fatal: continuing
    /// would risk aliasing slot ids, so the simulation halts.
    #[error("cell limit reached: {live} live cells, limit {limit}")]
    CellLimitReached { live: usize, limit: usize },

    /// Free-slot scan probed the whole arena without finding an empty
    /// slot. Fatal for the same reason as `CellLimitReached`.
    #[error("free-slot scan exhausted after {probes} probes ({live} live cells)")]
    SlotScanExhausted { probes: usize, live: usize },

    /// The engine latched itself off after a fatal error; every further
    /// `tick` call reports this instead of touching the arena.
    #[error("engine halted after a fatal error")]
    Halted,

    #[error("no free controller slot (game is full)")]
    GameFull,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
