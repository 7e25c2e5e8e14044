use std::fmt;

use chrono::NaiveDate;
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TeamId(String);

impl TeamId {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchKey {
    pub date: NaiveDate,
    pub home: TeamId,
    pub away: TeamId,
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} vs {}", self.date, self.home, self.away)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOdds {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl MatchOdds {
    pub fn new(home: f64, draw: f64, away: f64) -> Option<Self> {
        let valid = |v: f64| v.is_finite() && v > 1.0;
        if valid(home) && valid(draw) && valid(away) {
            Some(Self { home, draw, away })
        } else {
            None
        }
    }

    /// Implied probabilities with the bookmaker margin removed.
    pub fn implied(&self) -> [f64; 3] {
        let raw = [1.0 / self.home, 1.0 / self.draw, 1.0 / self.away];
        let overround: f64 = raw.iter().sum();
        raw.map(|p| p / overround)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub date: NaiveDate,
    pub home: TeamId,
    pub away: TeamId,
    pub home_goals: u16,
    pub away_goals: u16,
    pub odds: Option<MatchOdds>,
}

impl MatchRecord {
    pub fn key(&self) -> MatchKey {
        MatchKey {
            date: self.date,
            home: self.home.clone(),
            away: self.away.clone(),
        }
    }

    pub fn goals_for(&self, team: &TeamId) -> Option<u16> {
        if &self.home == team {
            Some(self.home_goals)
        } else if &self.away == team {
            Some(self.away_goals)
        } else {
            None
        }
    }

    pub fn goals_against(&self, team: &TeamId) -> Option<u16> {
        if &self.home == team {
            Some(self.away_goals)
        } else if &self.away == team {
            Some(self.home_goals)
        } else {
            None
        }
    }

    pub fn points_for(&self, team: &TeamId) -> Option<u8> {
        let scored = self.goals_for(team)?;
        let conceded = self.goals_against(team)?;
        Some(match scored.cmp(&conceded) {
            std::cmp::Ordering::Greater => 3,
            std::cmp::Ordering::Equal => 1,
            std::cmp::Ordering::Less => 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub date: NaiveDate,
    pub home: TeamId,
    pub away: TeamId,
    pub odds: Option<MatchOdds>,
}

impl Fixture {
    pub fn key(&self) -> MatchKey {
        MatchKey {
            date: self.date,
            home: self.home.clone(),
            away: self.away.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{MatchOdds, MatchRecord, TeamId};

    fn team(name: &str) -> TeamId {
        TeamId::parse(name).unwrap()
    }

    #[test]
    fn team_id_rejects_blank() {
        assert!(TeamId::parse("   ").is_none());
        assert_eq!(team("  Arsenal ").as_str(), "Arsenal");
    }

    #[test]
    fn points_follow_result() {
        let m = MatchRecord {
            date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            home: team("A"),
            away: team("B"),
            home_goals: 2,
            away_goals: 2,
            odds: None,
        };
        assert_eq!(m.points_for(&team("A")), Some(1));
        assert_eq!(m.points_for(&team("B")), Some(1));
        assert_eq!(m.points_for(&team("C")), None);
        assert_eq!(m.key().to_string(), "2024-03-02 A vs B");
    }

    #[test]
    fn implied_odds_remove_margin() {
        let odds = MatchOdds::new(2.0, 3.4, 3.9).unwrap();
        let p = odds.implied();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[0] > p[1] && p[0] > p[2]);
        assert!(MatchOdds::new(0.9, 3.0, 3.0).is_none());
    }
}
