//! Cross-cutting insights derived from a combined location + vibe pass.

use serde::{Deserialize, Serialize};

use crate::collaborators::{LocationAnalysis, VibeReading};

/// Energy below which a rest suggestion is made.
const LOW_ENERGY: f64 = 0.3;

/// Whether the measured vibe matches what the venue is known for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeAlignment {
    pub venue_id: String,
    pub expected: String,
    pub observed: String,
    pub aligned: bool,
    /// Confidence in the verdict, 0..1.
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    /// The venue does not feel the way it usually does.
    FindMatchingVenue { vibe: String },
    /// Friends are nearby and the venue is living up to its vibe.
    InviteFriends { venue_id: String, friends: usize },
    Recharge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialOpportunity {
    pub friend_ids: Vec<String>,
    pub venue_id: Option<String>,
    pub vibe: String,
}

/// Sharing restrictions triggered by a private zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyAdjustment {
    pub zone_id: String,
    pub hide_location: bool,
    pub suppress_social: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CombinedInsights {
    pub alignment: Option<VibeAlignment>,
    pub recommendations: Vec<Recommendation>,
    pub social_opportunities: Vec<SocialOpportunity>,
    pub privacy_adjustments: Vec<PrivacyAdjustment>,
}

impl CombinedInsights {
    /// Derive insights from a vibe reading and the location pass taken at
    /// the same moment.
    ///
    /// Private zones win over everything social: no opportunities or
    /// invitations are produced while the device is inside one.
    pub fn synthesize(vibe: &VibeReading, location: &LocationAnalysis) -> Self {
        let privacy_adjustments: Vec<PrivacyAdjustment> = location
            .geofences
            .iter()
            .filter(|zone| zone.private)
            .map(|zone| PrivacyAdjustment {
                zone_id: zone.zone_id.clone(),
                hide_location: true,
                suppress_social: true,
            })
            .collect();
        let private = !privacy_adjustments.is_empty();

        let alignment = location.venue.as_ref().and_then(|venue| {
            let expected = venue.expected_vibe.as_ref()?;
            let aligned = expected.eq_ignore_ascii_case(&vibe.vibe);
            let score = vibe.confidence * venue.confidence;
            Some(VibeAlignment {
                venue_id: venue.venue_id.clone(),
                expected: expected.clone(),
                observed: vibe.vibe.clone(),
                aligned,
                score: score.clamp(0.0, 1.0),
            })
        });

        let friends = &location.proximity.nearby_friends;
        let mut recommendations = Vec::new();
        match &alignment {
            Some(a) if !a.aligned => recommendations.push(Recommendation::FindMatchingVenue {
                vibe: a.observed.clone(),
            }),
            Some(a) if !private && !friends.is_empty() => recommendations.push(Recommendation::InviteFriends {
                venue_id: a.venue_id.clone(),
                friends: friends.len(),
            }),
            _ => {}
        }
        if vibe.energy < LOW_ENERGY {
            recommendations.push(Recommendation::Recharge);
        }

        let social_opportunities = if private || friends.is_empty() {
            Vec::new()
        } else {
            vec![SocialOpportunity {
                friend_ids: friends.clone(),
                venue_id: location.venue.as_ref().map(|v| v.venue_id.clone()),
                vibe: vibe.vibe.clone(),
            }]
        };

        Self {
            alignment,
            recommendations,
            social_opportunities,
            privacy_adjustments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{GeofenceHit, ProximityUpdate, VenueMatch};

    fn reading(vibe: &str, energy: f64) -> VibeReading {
        VibeReading {
            vibe: vibe.to_string(),
            confidence: 0.8,
            energy,
        }
    }

    fn at_venue(expected: &str, friends: &[&str]) -> LocationAnalysis {
        LocationAnalysis {
            geofences: Vec::new(),
            venue: Some(VenueMatch {
                venue_id: "v-42".into(),
                name: "Kiez Bar".into(),
                confidence: 0.9,
                expected_vibe: Some(expected.to_string()),
            }),
            proximity: ProximityUpdate {
                nearby_friends: friends.iter().map(|f| f.to_string()).collect(),
            },
        }
    }

    #[test]
    fn aligned_vibe_with_friends_suggests_invite() {
        let insights = CombinedInsights::synthesize(&reading("Social", 0.7), &at_venue("social", &["ana", "ben"]));
        let alignment = insights.alignment.unwrap();
        assert!(alignment.aligned);
        assert!((alignment.score - 0.72).abs() < 1e-9);
        assert_eq!(
            insights.recommendations,
            vec![Recommendation::InviteFriends { venue_id: "v-42".into(), friends: 2 }]
        );
        assert_eq!(insights.social_opportunities.len(), 1);
        assert_eq!(insights.social_opportunities[0].venue_id.as_deref(), Some("v-42"));
    }

    #[test]
    fn misaligned_vibe_suggests_other_venue() {
        let insights = CombinedInsights::synthesize(&reading("chill", 0.2), &at_venue("energetic", &[]));
        assert!(!insights.alignment.unwrap().aligned);
        assert_eq!(
            insights.recommendations,
            vec![
                Recommendation::FindMatchingVenue { vibe: "chill".into() },
                Recommendation::Recharge,
            ]
        );
        assert!(insights.social_opportunities.is_empty());
    }

    #[test]
    fn private_zone_suppresses_social() {
        let mut location = at_venue("social", &["ana"]);
        location.geofences.push(GeofenceHit {
            zone_id: "home".into(),
            name: "Home".into(),
            private: true,
        });
        let insights = CombinedInsights::synthesize(&reading("social", 0.9), &location);
        assert_eq!(insights.privacy_adjustments.len(), 1);
        assert!(insights.privacy_adjustments[0].suppress_social);
        assert!(insights.social_opportunities.is_empty());
        assert!(insights.recommendations.is_empty());
    }

    #[test]
    fn no_venue_means_no_alignment() {
        let location = LocationAnalysis {
            geofences: Vec::new(),
            venue: None,
            proximity: ProximityUpdate::default(),
        };
        let insights = CombinedInsights::synthesize(&reading("focused", 0.5), &location);
        assert_eq!(insights, CombinedInsights::default());
    }
}
