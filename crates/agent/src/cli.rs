use clap::Parser;
use infrastructure::constants::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "dnsguard-agent",
    about = "Kernel-bypass DNS threat-analysis data plane",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Path to the compiled steering program (overrides the config's bpf_path)
    #[arg(long, value_name = "PATH")]
    pub bpf: Option<String>,

    /// Log level override (takes precedence over config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log format override: text or json
    #[arg(long)]
    pub log_format: Option<String>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_apply() {
        let cli = Cli::parse_from(["dnsguard-agent"]);
        assert_eq!(cli.config, DEFAULT_CONFIG_PATH);
        assert!(cli.bpf.is_none());
    }

    #[test]
    fn bpf_override_parses() {
        let cli = Cli::parse_from(["dnsguard-agent", "--bpf", "bpf/filter.o", "-c", "x.yaml"]);
        assert_eq!(cli.bpf.as_deref(), Some("bpf/filter.o"));
        assert_eq!(cli.config, "x.yaml");
    }
}
