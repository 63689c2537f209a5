/// Upper bound of the track volume scale; 100 maps to unity gain.
pub const VOLUME_MAX: f32 = 100.0;

/// Balance runs from `-BALANCE_LIMIT` (hard left) to `+BALANCE_LIMIT` (hard right).
pub const BALANCE_LIMIT: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SongId(pub u64);

impl std::fmt::Display for SongId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "song#{}", self.0)
    }
}

/// One recorded stem of a song.
///
/// `volume` and `balance` are private so they can only hold in-range values:
/// volume is always within `[0, VOLUME_MAX]` and balance within
/// `[-BALANCE_LIMIT, BALANCE_LIMIT]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    volume: f32,
    balance: f32,
    pub muted: bool,
    pub solo: bool,
    /// Opaque locator handed to the audio source provider alongside the id.
    pub resource: String,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            volume: VOLUME_MAX,
            balance: 0.0,
            muted: false,
            solo: false,
            resource: String::new(),
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.set_volume(volume);
        self
    }

    pub fn with_balance(mut self, balance: f32) -> Self {
        self.set_balance(balance);
        self
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn balance(&self) -> f32 {
        self.balance
    }

    /// Clamp into `[0, VOLUME_MAX]`. NaN is treated as silence.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, VOLUME_MAX)
        };
    }

    /// Clamp into `[-BALANCE_LIMIT, BALANCE_LIMIT]`. NaN is treated as center.
    pub fn set_balance(&mut self, balance: f32) {
        self.balance = if balance.is_nan() {
            0.0
        } else {
            balance.clamp(-BALANCE_LIMIT, BALANCE_LIMIT)
        };
    }

    /// Linear gain multiplier in `[0, 1]`.
    pub fn gain(&self) -> f32 {
        self.volume / VOLUME_MAX
    }

    /// Pan position in `[-1, 1]`.
    pub fn pan(&self) -> f32 {
        self.balance / BALANCE_LIMIT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    pub tracks: Vec<Track>,
    /// Seconds. Only authoritative once the engine has decoded the tracks.
    pub duration: f64,
}

impl Song {
    pub fn new(id: SongId, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            artist: artist.into(),
            tracks: Vec::new(),
            duration: 0.0,
        }
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }
}
