//! Human-readable airspace tables for the terminal.

use comfy_table::{Cell, Table};

use adsb_track_core::airspace::AirspaceSnapshot;

fn opt<T>(val: Option<T>, fmt: impl Fn(T) -> String) -> String {
    val.map(fmt).unwrap_or_else(|| "-".into())
}

/// Build a table of every aircraft in the snapshot, newest first.
///
/// `now` drives the age column; pass the replay stop time when printing a
/// reconstructed airspace.
pub fn airspace_table(airspace: &AirspaceSnapshot, now: f64) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Address", "Callsign", "Lat", "Lon", "Alt (ft)", "Src", "Speed", "Hdg", "VRate", "Age (s)",
    ]);

    for ac in airspace.newest_first() {
        let pos = ac.position.as_ref().map(|f| &f.value);
        let vel = ac.velocity.as_ref().map(|f| &f.value);
        table.add_row(vec![
            Cell::new(&ac.address),
            Cell::new(ac.callsign().unwrap_or("-")),
            Cell::new(opt(pos, |p| format!("{:.4}", p.latitude))),
            Cell::new(opt(pos, |p| format!("{:.4}", p.longitude))),
            Cell::new(opt(pos, |p| p.altitude.to_string())),
            Cell::new(opt(pos, |p| p.altitude_src.to_string())),
            Cell::new(opt(vel, |v| format!("{:.0}", v.speed))),
            Cell::new(opt(vel, |v| format!("{:.1}", v.angle))),
            Cell::new(opt(vel, |v| format!("{:+}", v.vertical_speed))),
            Cell::new(opt(ac.age(now), |a| format!("{a:.0}"))),
        ]);
    }

    table
}

/// Print the status table, or a short note when nothing has been seen.
pub fn print_airspace(airspace: &AirspaceSnapshot, now: f64) {
    println!();
    if airspace.is_empty() {
        println!("No aircraft.");
        return;
    }
    println!("Aircraft: {}", airspace.len());
    println!("{}", airspace_table(airspace, now));
}
