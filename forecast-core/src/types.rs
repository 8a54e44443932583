//! Identifier newtypes for catalog objects and stored records.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a forecasting model (team submission stream).
    ModelId
);
id_type!(
    /// Identifier of a time-point forecasts are anchored to.
    TimePointId
);
id_type!(
    /// Identifier of a spatial unit.
    UnitId
);
id_type!(
    /// Identifier of a forecast target.
    TargetId
);
id_type!(
    /// Identifier of a stored forecast version.
    VersionId
);
id_type!(
    /// Identifier of a stored prediction element. Assigned in insertion order.
    ElementId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_bare_integers() {
        let json = serde_json::to_string(&ModelId(7)).unwrap();
        assert_eq!(json, "7");
        let parsed: UnitId = serde_json::from_str("12").unwrap();
        assert_eq!(parsed, UnitId(12));
    }

    #[test]
    fn ids_order_numerically() {
        assert!(ElementId(2) < ElementId(10));
    }
}
