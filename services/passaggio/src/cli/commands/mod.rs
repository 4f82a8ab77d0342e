pub mod cookies;
pub mod logging;
pub mod upstream;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("passaggio")
        .about("Session-authentication gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("PASSAGGIO_PORT")
                .value_parser(clap::value_parser!(u16)),
        );

    let command = upstream::with_args(command);
    let command = cookies::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "passaggio");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Session-authentication gateway".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn parses_port_and_upstream() {
        let command = new();
        let matches = command.get_matches_from(vec![
            "passaggio",
            "--port",
            "8086",
            "--upstream-url",
            "https://auth.example.test",
            "--issuer",
            "passaggio",
            "--audience",
            "auth-server",
            "--cookie-secret",
            "cs",
            "--service-secret",
            "ss",
        ]);

        assert_eq!(matches.get_one::<u16>("port").copied(), Some(8086));

        let upstream = upstream::Options::parse(&matches).expect("upstream options");
        assert_eq!(upstream.upstream_url, "https://auth.example.test");
        assert_eq!(upstream.issuer, "passaggio");
        assert!(upstream.key_id.is_none());

        let cookies = cookies::Options::parse(&matches).expect("cookie options");
        assert_eq!(cookies.access_cookie_name, "passaggio_access");
        assert!(!cookies.cookie_insecure);
    }

    #[test]
    fn missing_secrets_fail_parse() {
        let command = new();
        let matches = command.get_matches_from(vec![
            "passaggio",
            "--upstream-url",
            "https://auth.example.test",
            "--issuer",
            "passaggio",
            "--audience",
            "auth-server",
        ]);

        let result = cookies::Options::parse(&matches);
        assert!(result.is_err());
    }
}
