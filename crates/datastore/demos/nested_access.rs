//! Walk into a nested document, edit it and diff the result.
//!
//! cargo run --package datastore --example nested_access

use datastore::{Document, PrintOptions, apply_diff, compute_diff, json};

fn main() -> Result<(), datastore::Error> {
    let original = json::from_json(r#"{"users": [{"name": "Amy"}, {"name": "Bob", "admin": true}]}"#)?;
    let mut doc = original.clone();

    // node = root["users"][1]
    let users = doc.get(doc.root(), "users")?;
    let bob = doc.get(users, 1)?;
    println!("{}", doc.get_value(bob, "name")?.as_str().unwrap_or_default());

    doc.erase(bob, "admin")?;
    doc.set_string(bob, "name", "Robert")?;
    doc.set_u32(doc.root(), "version", 2)?;

    let diff = compute_diff(&original, &doc)?;
    println!("diff: {}", diff.to_text(diff.root(), PrintOptions::default().sorted())?);

    let mut replica = original.clone();
    apply_diff(&diff, &mut replica)?;
    println!("{}", replica.to_text(replica.root(), PrintOptions::multiline().sorted())?);
    println!("md5 {}", replica.compute_md5()?);
    Ok(())
}
