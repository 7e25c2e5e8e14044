use std::collections::HashMap;

use crate::match_record::{MatchRecord, TeamId};

#[derive(Debug, Clone, Copy)]
pub struct EloConfig {
    pub k: f64,
    pub home_adv_pts: f64,
    pub initial: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 20.0,
            home_adv_pts: 60.0,
            initial: 1500.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EloTable {
    cfg: EloConfig,
    ratings: HashMap<TeamId, f64>,
}

impl EloTable {
    pub fn new(cfg: EloConfig) -> Self {
        Self {
            cfg,
            ratings: HashMap::new(),
        }
    }

    pub fn rating(&self, team: &TeamId) -> f64 {
        self.ratings.get(team).copied().unwrap_or(self.cfg.initial)
    }

    pub fn expected_home(&self, home: &TeamId, away: &TeamId) -> f64 {
        expected_score(self.rating(home) + self.cfg.home_adv_pts, self.rating(away))
    }

    pub fn apply(&mut self, m: &MatchRecord) {
        let eh = self.rating(&m.home);
        let ea = self.rating(&m.away);
        let expected_home = expected_score(eh + self.cfg.home_adv_pts, ea);
        let s_home = if m.home_goals > m.away_goals {
            1.0
        } else if m.home_goals < m.away_goals {
            0.0
        } else {
            0.5
        };

        let delta = self.cfg.k * (s_home - expected_home);
        self.ratings.insert(m.home.clone(), eh + delta);
        self.ratings.insert(m.away.clone(), ea - delta);
    }
}

pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{EloConfig, EloTable, expected_score};
    use crate::match_record::{MatchRecord, TeamId};

    #[test]
    fn equal_ratings_expect_half() {
        assert!((expected_score(1500.0, 1500.0) - 0.5).abs() < 1e-12);
        assert!(expected_score(1600.0, 1500.0) > 0.5);
    }

    #[test]
    fn rating_exchange_is_zero_sum() {
        let a = TeamId::parse("A").unwrap();
        let b = TeamId::parse("B").unwrap();
        let mut table = EloTable::new(EloConfig::default());
        table.apply(&MatchRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            home: a.clone(),
            away: b.clone(),
            home_goals: 0,
            away_goals: 1,
            odds: None,
        });
        assert!(table.rating(&b) > 1500.0);
        assert!((table.rating(&a) + table.rating(&b) - 3000.0).abs() < 1e-9);
    }
}
