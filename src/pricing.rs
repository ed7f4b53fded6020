use dashmap::DashMap;
use serde::Serialize;

use crate::models::delivery::{PackageCategory, Zone};

/// One row of the category price table.
#[derive(Debug, Clone, Serialize)]
pub struct Tariff {
    pub category: PackageCategory,
    pub label: &'static str,
    pub base_price: u64,
    /// Priced individually by staff instead of from the table.
    pub quote_required: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceQuote {
    Fixed {
        base_price: u64,
        zone_surcharge: u64,
        total: u64,
    },
    QuoteRequired,
}

/// Category x zone price lookup, independent of delivery state.
pub struct PricingTable {
    tariffs: DashMap<PackageCategory, Tariff>,
    surcharges: DashMap<Zone, u64>,
}

impl PricingTable {
    pub fn with_defaults() -> Self {
        let tariffs = DashMap::new();
        for tariff in [
            Tariff {
                category: PackageCategory::Leger,
                label: "Leger (0-5 kg)",
                base_price: 1000,
                quote_required: false,
            },
            Tariff {
                category: PackageCategory::Moyen,
                label: "Moyen (5-15 kg)",
                base_price: 2500,
                quote_required: false,
            },
            Tariff {
                category: PackageCategory::Lourd,
                label: "Lourd (15-30 kg)",
                base_price: 5000,
                quote_required: false,
            },
            Tariff {
                category: PackageCategory::TresLourd,
                label: "Tres lourd (30 kg+)",
                base_price: 0,
                quote_required: true,
            },
        ] {
            tariffs.insert(tariff.category, tariff);
        }

        let surcharges = DashMap::new();
        surcharges.insert(Zone::Zone1, 0);
        surcharges.insert(Zone::Zone2, 500);
        surcharges.insert(Zone::Zone3, 1500);

        Self {
            tariffs,
            surcharges,
        }
    }

    pub fn quote(&self, category: PackageCategory, zone: Zone) -> PriceQuote {
        let Some(tariff) = self.tariffs.get(&category) else {
            return PriceQuote::QuoteRequired;
        };

        if tariff.quote_required {
            return PriceQuote::QuoteRequired;
        }

        let zone_surcharge = self
            .surcharges
            .get(&zone)
            .map(|entry| *entry.value())
            .unwrap_or(0);

        PriceQuote::Fixed {
            base_price: tariff.base_price,
            zone_surcharge,
            total: tariff.base_price + zone_surcharge,
        }
    }

    pub fn tariffs(&self) -> Vec<Tariff> {
        let mut rows: Vec<Tariff> = self
            .tariffs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|t| t.base_price);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::{PriceQuote, PricingTable};
    use crate::models::delivery::{PackageCategory, Zone};

    #[test]
    fn light_package_in_zone_one_costs_base_only() {
        let table = PricingTable::with_defaults();
        let quote = table.quote(PackageCategory::Leger, Zone::Zone1);
        assert_eq!(
            quote,
            PriceQuote::Fixed {
                base_price: 1000,
                zone_surcharge: 0,
                total: 1000,
            }
        );
    }

    #[test]
    fn outer_zone_adds_surcharge() {
        let table = PricingTable::with_defaults();
        let quote = table.quote(PackageCategory::Moyen, Zone::Zone3);
        assert_eq!(
            quote,
            PriceQuote::Fixed {
                base_price: 2500,
                zone_surcharge: 1500,
                total: 4000,
            }
        );
    }

    #[test]
    fn very_heavy_requires_quote() {
        let table = PricingTable::with_defaults();
        let quote = table.quote(PackageCategory::TresLourd, Zone::Zone1);
        assert_eq!(quote, PriceQuote::QuoteRequired);
    }
}
