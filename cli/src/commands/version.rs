//! Version command

/// Run the version command.
pub fn run(json: bool) {
    println!("{}", render(json));
}

fn render(json: bool) -> String {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        format!(r#"{{"version":"{version}"}}"#)
    } else {
        format!("shipyard {version}")
    }
}
