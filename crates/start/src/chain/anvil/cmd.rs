//! Command builder for Anvil.

use std::path::Path;

/// Anvil listens on every interface inside the container.
const LISTEN_HOST: &str = "0.0.0.0";

/// Builder for the Anvil command line.
#[derive(Debug, Clone)]
pub struct AnvilCmdBuilder {
    chain_id: u64,
    block_time: Option<u64>,
    accounts: usize,
    config_out: Option<String>,
    extra_args: Vec<String>,
}

impl AnvilCmdBuilder {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            block_time: None,
            accounts: super::DEFAULT_ACCOUNTS,
            config_out: None,
            extra_args: Vec::new(),
        }
    }

    /// Block time in seconds. `None` mines a block per transaction.
    pub fn block_time(mut self, block_time: Option<u64>) -> Self {
        self.block_time = block_time;
        self
    }

    /// Number of funded dev accounts to generate.
    pub fn accounts(mut self, accounts: usize) -> Self {
        self.accounts = accounts;
        self
    }

    /// Where Anvil writes its generated accounts and keys.
    pub fn config_out(mut self, path: impl AsRef<Path>) -> Self {
        self.config_out = Some(path.as_ref().display().to_string());
        self
    }

    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Vec<String> {
        let mut cmd = vec![
            "--host".to_string(),
            LISTEN_HOST.to_string(),
            "--port".to_string(),
            super::ANVIL_PORT.to_string(),
            "--chain-id".to_string(),
            self.chain_id.to_string(),
            "--accounts".to_string(),
            self.accounts.to_string(),
        ];

        if let Some(block_time) = self.block_time {
            cmd.push("--block-time".to_string());
            cmd.push(block_time.to_string());
        }

        if let Some(config_out) = self.config_out {
            cmd.push("--config-out".to_string());
            cmd.push(config_out);
        }

        cmd.extend(self.extra_args);

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anvil_cmd_builder() {
        let cmd = AnvilCmdBuilder::new(1337)
            .accounts(5)
            .config_out("/data/anvil.json")
            .extra_args(["--silent"])
            .build();

        assert_eq!(
            cmd,
            [
                "--host",
                "0.0.0.0",
                "--port",
                "8545",
                "--chain-id",
                "1337",
                "--accounts",
                "5",
                "--config-out",
                "/data/anvil.json",
                "--silent"
            ]
        );
    }

    #[test]
    fn test_block_time_is_optional() {
        let without = AnvilCmdBuilder::new(1337).build();
        assert!(!without.contains(&"--block-time".to_string()));

        let with = AnvilCmdBuilder::new(1337).block_time(Some(2)).build();
        let position = with.iter().position(|arg| arg == "--block-time").unwrap();
        assert_eq!(with[position + 1], "2");
    }
}
