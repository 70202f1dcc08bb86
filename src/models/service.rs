use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    FlatTire,
    EngineBreakdown,
    OilLeak,
    NotSure,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::FlatTire,
        ServiceKind::EngineBreakdown,
        ServiceKind::OilLeak,
        ServiceKind::NotSure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::FlatTire => "flat_tire",
            ServiceKind::EngineBreakdown => "engine_breakdown",
            ServiceKind::OilLeak => "oil_leak",
            ServiceKind::NotSure => "not_sure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "flat_tire" => Some(ServiceKind::FlatTire),
            "engine_breakdown" => Some(ServiceKind::EngineBreakdown),
            "oil_leak" => Some(ServiceKind::OilLeak),
            "not_sure" => Some(ServiceKind::NotSure),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::FlatTire => "Flat tire",
            ServiceKind::EngineBreakdown => "Engine breakdown",
            ServiceKind::OilLeak => "Oil leak",
            ServiceKind::NotSure => "Don't know",
        }
    }

    /// Kinds whose base price excludes parts.
    pub fn parts_extra(&self) -> bool {
        matches!(self, ServiceKind::EngineBreakdown | ServiceKind::NotSure)
    }

    /// Menu choice ("1".."4") or a keyword from the service name.
    pub fn from_choice(input: &str) -> Option<Self> {
        let text = input.trim().to_lowercase();
        match text.as_str() {
            "1" => return Some(ServiceKind::FlatTire),
            "2" => return Some(ServiceKind::EngineBreakdown),
            "3" => return Some(ServiceKind::OilLeak),
            "4" => return Some(ServiceKind::NotSure),
            _ => {}
        }
        if text.contains("flat tire") || text.contains("flat tyre") {
            Some(ServiceKind::FlatTire)
        } else if text.contains("engine") {
            Some(ServiceKind::EngineBreakdown)
        } else if text.contains("oil") {
            Some(ServiceKind::OilLeak)
        } else if text.contains("dont know") || text.contains("don't know") {
            Some(ServiceKind::NotSure)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub kind: ServiceKind,
    pub price: i64,
    pub description: String,
}

impl Service {
    /// Catalog seeded at startup.
    pub fn defaults() -> Vec<Service> {
        vec![
            Service {
                kind: ServiceKind::FlatTire,
                price: 300,
                description: "Flat tire repair service".to_string(),
            },
            Service {
                kind: ServiceKind::EngineBreakdown,
                price: 500,
                description: "Engine breakdown diagnosis and basic repair".to_string(),
            },
            Service {
                kind: ServiceKind::OilLeak,
                price: 300,
                description: "Oil leak repair service".to_string(),
            },
            Service {
                kind: ServiceKind::NotSure,
                price: 500,
                description: "General diagnosis and basic repair".to_string(),
            },
        ]
    }

    pub fn price_label(&self) -> String {
        if self.kind.parts_extra() {
            format!("₹{}+", self.price)
        } else {
            format!("₹{}", self.price)
        }
    }
}
