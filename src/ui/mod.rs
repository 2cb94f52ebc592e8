use anyhow::Result;
use eframe::egui::Vec2;

use crate::app::AppConfig;
use crate::export;
use crate::io;
use crate::remote::{clamp_top_k, BackendClient, CompareRequest, DiscreteAnalysis};
use crate::tree::viewer::Viewer;

const SUMMARY_TRAITS: usize = 8;
const SUMMARY_VALUES: usize = 3;

pub fn render_summary(viewer: &Viewer) {
    let Some(tree) = viewer.tree() else {
        println!("No tree loaded.");
        if let Some(status) = viewer.status() {
            println!("{}", status.message);
        }
        return;
    };

    println!(
        "Loaded tree with {} node(s), {} leaf/leaves, {} located on the map.",
        tree.len(),
        tree.leaf_count(),
        viewer.geo().located()
    );
    if let Some(date) = viewer.reference_date() {
        println!("Reference date: {}", date.format("%Y-%m-%d"));
    }

    let colors = viewer.colors();
    match colors.trait_key.as_deref() {
        Some(_) => println!("Colouring by {} ({}).", colors.label, colors.kind.label()),
        None => println!("No usable colouring trait; tips use the default colour."),
    }

    if viewer.timeline().has_data() {
        println!("Timeline: {}", viewer.timeline_label());
        let events = viewer.timeline().events();
        println!(
            "{} appearance(s), {} migration event(s), {} with both ends located.",
            viewer.timeline().appearances().len(),
            events.len(),
            events.iter().filter(|event| event.has_coordinates()).count()
        );
    }

    let summary = viewer.trait_summary("", Some(SUMMARY_TRAITS));
    if !summary.is_empty() {
        println!("Attributes:");
    }
    for entry in &summary {
        let values: Vec<String> = entry
            .values
            .iter()
            .take(SUMMARY_VALUES)
            .map(|(value, count)| format!("{value} ({count})"))
            .collect();
        let more = if entry.values.len() > SUMMARY_VALUES {
            ", …"
        } else {
            ""
        };
        println!(
            "- {} [{}]: {}{}",
            viewer.display_name(&entry.key),
            entry.total,
            values.join(", "),
            more
        );
    }

    if let Some(status) = viewer.status() {
        println!("{}", status.message);
    }
}

/// Write every export the command line asked for.
pub fn export(viewer: &Viewer, config: &AppConfig) -> Result<()> {
    if let Some(dest) = &config.output {
        export::export_tree_svg(viewer, dest)?;
        println!("Wrote tree SVG to {}", dest.display());
    }
    if let Some(dest) = &config.geojson {
        export::export_map_geojson(viewer, dest)?;
        println!("Wrote GeoJSON to {}", dest.display());
    }
    if let Some(dest) = &config.map_image {
        let size = Vec2::new(config.width as f32, config.height as f32);
        export::export_map_png(viewer, size, dest, config.with_tiles)?;
        println!("Wrote map image to {}", dest.display());
    }
    if let Some(dest) = &config.save_payload {
        if let Some(payload) = viewer.payload() {
            io::save_payload(&payload, dest)?;
            println!("Wrote payload to {}", dest.display());
        }
    }
    Ok(())
}

pub fn print_analysis(analysis: &DiscreteAnalysis) {
    println!("Discrete analysis {}", analysis.analysis_id);
    for root in &analysis.root_distribution {
        println!("  root {}: {:.3}", root.location, root.probability);
    }
    for (rank, path) in analysis.top_paths.iter().enumerate() {
        let when = path
            .time_median
            .map(|year| format!(" ~{year:.1}"))
            .unwrap_or_default();
        println!(
            "  {:>2}. {} → {} weight {:.2}{}",
            rank + 1,
            path.src,
            path.dst,
            path.weight,
            when
        );
    }
}

/// Backend analyses requested on the command line.
pub fn run_analyses(client: &BackendClient, config: &AppConfig) -> Result<()> {
    let filename = config.filename.as_deref();
    if config.discrete {
        let analysis = client.discrete_analysis(filename, config.top_k, None)?;
        print_analysis(&analysis);
    }
    if config.matrix {
        let matrix = client.migration_matrix(filename)?;
        println!("{}", matrix.summary());
    }
    if config.compare.len() >= 2 {
        let request = CompareRequest {
            filenames: config.compare.clone(),
            labels: (1..=config.compare.len())
                .map(|index| format!("Tree {index}"))
                .collect(),
            top_k: clamp_top_k(config.top_k),
        };
        let comparison = client.compare(&request)?;
        for difference in comparison.path_differences.iter().take(10) {
            println!(
                "  {} → {} Δ {:.2}{}",
                difference.src,
                difference.dst,
                difference.delta,
                difference
                    .leading_label
                    .as_deref()
                    .map(|label| format!(" (led by {label})"))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}
