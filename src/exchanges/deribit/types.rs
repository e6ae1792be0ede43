use crate::core::errors::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// String-valued Deribit enum: wire name via serde, `FromStr` and `Display`
macro_rules! wire_enum {
    (
        $(#[$meta:meta])* $name:ident, $field:literal {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = SessionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| {
                        let allowed: Vec<&str> = Self::ALL.iter().map(|v| v.as_str()).collect();
                        SessionError::InvalidParameters(format!(
                            "invalid '{}' value '{}', expected one of: {}",
                            $field,
                            s,
                            allowed.join(", ")
                        ))
                    })
            }
        }
    };
}

wire_enum!(
    /// Order side; selects `private/buy` or `private/sell`
    Direction, "direction" {
        Buy => "buy",
        Sell => "sell",
    }
);

wire_enum!(
    #[derive(Default)]
    OrderType, "type" {
        #[default]
        Limit => "limit",
        StopLimit => "stop_limit",
        Market => "market",
        StopMarket => "stop_market",
    }
);

wire_enum!(
    /// Price source a stop order triggers on
    Trigger, "trigger" {
        IndexPrice => "index_price",
        MarkPrice => "mark_price",
        LastPrice => "last_price",
    }
);

wire_enum!(
    TimeInForce, "time_in_force" {
        GoodTilCancelled => "good_til_cancelled",
        GoodTilDay => "good_til_day",
        FillOrKill => "fill_or_kill",
        ImmediateOrCancel => "immediate_or_cancel",
    }
);

wire_enum!(
    LinkedOrderType, "linked_order_type" {
        OneTriggersOther => "one_triggers_other",
        OneCancelsOther => "one_cancels_other",
        OneTriggersOneCancelsOther => "one_triggers_one_cancels_other",
    }
);

impl OrderType {
    /// Limit-priced types require `price`
    pub const fn requires_price(self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }

    /// Stop types require `trigger_price`
    pub const fn is_stop(self) -> bool {
        matches!(self, Self::StopLimit | Self::StopMarket)
    }
}

impl Direction {
    pub fn method(self) -> String {
        format!("private/{}", self.as_str())
    }
}

/// Order book depth accepted by `public/get_order_book`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BookDepth(u32);

impl BookDepth {
    pub const ALLOWED: [u32; 8] = [1, 5, 10, 20, 50, 100, 1000, 10000];

    pub fn new(depth: u32) -> Result<Self, SessionError> {
        if Self::ALLOWED.contains(&depth) {
            Ok(Self(depth))
        } else {
            Err(SessionError::InvalidParameters(format!(
                "invalid depth {}, expected one of {:?}",
                depth,
                Self::ALLOWED
            )))
        }
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl FromStr for BookDepth {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let depth = s
            .parse()
            .map_err(|_| SessionError::InvalidParameters(format!("invalid depth '{}'", s)))?;
        Self::new(depth)
    }
}

impl fmt::Display for BookDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip_through_from_str() {
        assert_eq!("stop_limit".parse::<OrderType>().unwrap(), OrderType::StopLimit);
        assert_eq!(TimeInForce::FillOrKill.to_string(), "fill_or_kill");
        assert_eq!(
            serde_json::to_value(Trigger::MarkPrice).unwrap(),
            serde_json::json!("mark_price")
        );
    }

    #[test]
    fn test_unknown_value_lists_choices() {
        let err = "hold".parse::<Direction>().unwrap_err();
        assert!(err.to_string().contains("expected one of: buy, sell"));
    }

    #[test]
    fn test_book_depth() {
        assert_eq!("20".parse::<BookDepth>().unwrap().get(), 20);
        assert!(BookDepth::new(2).is_err());
        assert!("deep".parse::<BookDepth>().is_err());
    }

    #[test]
    fn test_order_type_requirements() {
        assert_eq!(OrderType::default(), OrderType::Limit);
        assert!(OrderType::StopLimit.requires_price() && OrderType::StopLimit.is_stop());
        assert!(!OrderType::Market.requires_price() && !OrderType::Market.is_stop());
        assert_eq!(Direction::Sell.method(), "private/sell");
    }
}
