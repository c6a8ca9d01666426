use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a purchasable access tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Daily,
    Weekly,
    Monthly,
}

impl PlanId {
    pub const ALL: [PlanId; 3] = [PlanId::Daily, PlanId::Weekly, PlanId::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Daily => "daily",
            PlanId::Weekly => "weekly",
            PlanId::Monthly => "monthly",
        }
    }

    pub fn plan(&self) -> &'static Plan {
        match self {
            PlanId::Daily => &PLANS[0],
            PlanId::Weekly => &PLANS[1],
            PlanId::Monthly => &PLANS[2],
        }
    }
}

impl Default for PlanId {
    fn default() -> Self {
        PlanId::Monthly
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown plan: {0}")]
pub struct UnknownPlan(pub String);

impl FromStr for PlanId {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(PlanId::Daily),
            "weekly" => Ok(PlanId::Weekly),
            "monthly" => Ok(PlanId::Monthly),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: PlanId,
    pub display_name: &'static str,
    pub price: &'static str,
    pub discount_tag: Option<&'static str>,
}

pub static PLANS: [Plan; 3] = [
    Plan {
        id: PlanId::Daily,
        display_name: "Daily Pass",
        price: "KSh 50",
        discount_tag: None,
    },
    Plan {
        id: PlanId::Weekly,
        display_name: "Weekly Pass",
        price: "KSh 300",
        discount_tag: Some("Save 14%"),
    },
    Plan {
        id: PlanId::Monthly,
        display_name: "Monthly Pass",
        price: "KSh 1,000",
        discount_tag: Some("Best Value"),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_id_resolves_to_its_own_catalogue_entry() {
        for id in PlanId::ALL {
            assert_eq!(id.plan().id, id);
            assert_eq!(id.as_str().parse::<PlanId>().unwrap(), id);
        }
    }

    #[test]
    fn parsing_is_case_insensitive_and_rejects_unknown_ids() {
        assert_eq!(" Weekly ".parse::<PlanId>().unwrap(), PlanId::Weekly);
        assert!("yearly".parse::<PlanId>().is_err());
    }

    #[test]
    fn plan_ids_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&PlanId::Daily).unwrap(), "\"daily\"");
        let id: PlanId = serde_json::from_str("\"monthly\"").unwrap();
        assert_eq!(id, PlanId::Monthly);
    }
}
