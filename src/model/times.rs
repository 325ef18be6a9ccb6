// src/model/times.rs
//! Timestamps shared by groups and entries

use chrono::{DateTime, SubsecRound, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Times {
    pub creation: DateTime<Utc>,
    pub last_modification: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub expires: bool,
    pub usage_count: u32,
    pub location_changed: DateTime<Utc>,
}

/// Current time at the one-second precision both formats store
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

impl Times {
    pub fn now() -> Self {
        let now = now();
        Times {
            creation: now,
            last_modification: now,
            last_access: now,
            expiry: now,
            expires: false,
            usage_count: 0,
            location_changed: now,
        }
    }

    pub fn touch(&mut self) {
        let now = now();
        self.last_access = now;
        self.last_modification = now;
    }

    pub fn is_expired(&self) -> bool {
        self.expires && self.expiry <= Utc::now()
    }
}

impl Default for Times {
    fn default() -> Self {
        Self::now()
    }
}
