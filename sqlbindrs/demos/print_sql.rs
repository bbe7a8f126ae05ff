use std::{env, fs, path::PathBuf, sync::Arc};

use sqlbind::{config::EngineConfig, generators::SqlTemplateGenerator, load_engine, StaticSubject};
use tracing_subscriber::EnvFilter;

fn usage() {
    eprintln!("Usage: print_sql <catalog_dir> <template_file> [permission...]");
    eprintln!("Example: cargo run --example print_sql -- demos/catalog demos/templates/sales_by_city.sql 'sales:*'");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1).collect::<Vec<_>>();
    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    let catalog_dir = PathBuf::from(args.remove(0));
    let template_path = PathBuf::from(args.remove(0));
    let subject = args
        .into_iter()
        .fold(StaticSubject::new(), |subject, permission| {
            subject.with_permission(permission)
        });

    let engine = load_engine(catalog_dir, EngineConfig::load_default())?;
    let template = fs::read_to_string(template_path)?;
    let generated = SqlTemplateGenerator::new(&engine).generate(
        &template,
        Vec::new(),
        Arc::new(subject),
    )?;

    println!("{}", generated.statement.sql);
    for column in &generated.columns {
        println!(
            "-- {:>2} {} ({} via {})",
            column.position, column.name, column.binding_set, column.source
        );
    }
    Ok(())
}
