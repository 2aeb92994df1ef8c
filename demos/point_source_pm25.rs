use anyhow::Result;
use inmap_sr::{Client, EmissionUnits, Feature, Geometry, JobRequest, SpatialTable};
use std::collections::BTreeMap;

fn main() -> Result<()> {
    // Example program that calls the library API: one elevated point source
    // in Los Angeles, run through the ISRM matrix.
    let mut rates = BTreeMap::new();
    rates.insert("PM2_5".to_string(), 100.0);
    rates.insert("NOx".to_string(), 50.0);
    rates.insert("SOx".to_string(), 10.0);

    let emissions = SpatialTable::new(vec![Feature::new(
        Geometry::Point {
            x: -118.2437,
            y: 34.0522,
        },
        rates,
    )]);

    let request = JobRequest::new(
        emissions,
        "isrm",
        ["TotalPM25", "TotalPopD", "DeathsK"],
        EmissionUnits::TonsPerYear,
    )?;

    let client = Client::new()?;
    let output = client.run(&request)?;

    let total: f64 = output
        .features()
        .iter()
        .filter_map(|f| f.attributes.get("TotalPM25"))
        .sum();
    println!(
        "{} receptors, summed TotalPM25 = {total:.3}",
        output.len()
    );
    Ok(())
}
