//! Built-in reference data: listed companies, news pools, bond templates.

use rust_decimal::Decimal;

use super::fixed_income::FixedIncomeTemplate;
use crate::core::{CompanyId, CompanyListing};

/// (id, symbol, name, sector, price in cents)
const COMPANIES: [(u32, &str, &str, &str, i64); 8] = [
    (1, "AURM", "Aurum Mining", "Mining", 4_250),
    (2, "BLTX", "Boltex Energy", "Energy", 3_180),
    (3, "CRVA", "Curva Logistics", "Logistics", 2_760),
    (4, "DLTA", "Delta Bank", "Financials", 5_640),
    (5, "ECOS", "Ecos Foods", "Consumer", 1_990),
    (6, "FRMA", "Farma Vida", "Healthcare", 6_310),
    (7, "GIGA", "Giga Telecom", "Telecom", 1_475),
    (8, "HLIO", "Helio Solar", "Utilities", 2_230),
];

/// The company list used when no external directory is configured.
pub fn default_companies() -> Vec<CompanyListing> {
    COMPANIES
        .iter()
        .map(|&(id, symbol, name, sector, cents)| {
            let price = Decimal::new(cents, 2);
            CompanyListing {
                id: CompanyId(id),
                symbol: symbol.to_string(),
                name: name.to_string(),
                current_price: price,
                base_price: price,
                sector: sector.to_string(),
            }
        })
        .collect()
}

pub const POSITIVE_NEWS: [&str; 8] = [
    "Central bank signals an interest rate cut next quarter",
    "Record harvest lifts consumer confidence",
    "Foreign investment inflows hit a five-year high",
    "Unemployment falls to its lowest level in a decade",
    "New infrastructure package approved by congress",
    "Exports surge after trade agreement is signed",
    "Inflation comes in below expectations",
    "Tech sector announces wave of hiring",
];

pub const NEGATIVE_NEWS: [&str; 8] = [
    "Fuel prices spike after refinery outage",
    "Credit rating agency puts sovereign debt on watch",
    "Strike paralyses the country's main port",
    "Drought threatens hydroelectric output",
    "Industrial production contracts for a third month",
    "Currency slides against the dollar",
    "Corruption probe reaches major state contractors",
    "Retail sales disappoint ahead of the holidays",
];

/// Bond-like instruments offered in round 1.
pub fn fixed_income_templates() -> Vec<FixedIncomeTemplate> {
    vec![
        FixedIncomeTemplate {
            id: "TSY-2R".into(),
            issuer: "National Treasury".into(),
            unit_price: Decimal::new(1_000, 0),
            interest_rate: Decimal::new(6, 2),
            term_months: 2,
        },
        FixedIncomeTemplate {
            id: "MUNI-3R".into(),
            issuer: "Capital City Infrastructure".into(),
            unit_price: Decimal::new(500, 0),
            interest_rate: Decimal::new(10, 2),
            term_months: 3,
        },
        FixedIncomeTemplate {
            id: "DEB-BLTX-4R".into(),
            issuer: "Boltex Energy".into(),
            unit_price: Decimal::new(250, 0),
            interest_rate: Decimal::new(15, 2),
            term_months: 4,
        },
        FixedIncomeTemplate {
            id: "CDB-DLTA-1R".into(),
            issuer: "Delta Bank".into(),
            unit_price: Decimal::new(100, 0),
            interest_rate: Decimal::new(3, 2),
            term_months: 1,
        },
    ]
}
