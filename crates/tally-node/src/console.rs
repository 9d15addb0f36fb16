// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY - OPERATOR CONSOLE
//
// One command per stdin line. Parsing is separate from execution so the
// grammar can be tested without a running node; execution goes through
// the LedgerService public operations only and renders a text reply.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::fmt::Write;
use tally_core::{parse_amount, verify_chain, Amount, Block};

use crate::{short_hash, LedgerService, NodeError};

pub const HELP: &str = "\
Commands:
  send <from> <to> <amount>            queue a transfer
  mine                                 seal pending transactions into a block
  stake <validator> <amount>           add stake to a validator
  delegate <delegator> <validator> <amount>
  balance [account]                    one account, or every known account
  validators                           stakes, rewards and delegators
  chain                                dump every block
  pending                              transactions waiting for a block
  sync                                 pull peer chains, adopt the longest
  status                               node summary
  help
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send {
        from: String,
        to: String,
        amount: Amount,
    },
    Mine,
    Stake {
        validator: String,
        amount: Amount,
    },
    Delegate {
        delegator: String,
        validator: String,
        amount: Amount,
    },
    Balance(Option<String>),
    Validators,
    Chain,
    Pending,
    Sync,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parse one console line. Blank lines are `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let p: Vec<&str> = line.split_whitespace().collect();
        let Some(verb) = p.first() else {
            return Ok(None);
        };
        let amount = |raw: &str| parse_amount(raw).map_err(|e| e.to_string());

        let command = match (*verb, p.len()) {
            ("send", 4) => Command::Send {
                from: p[1].to_string(),
                to: p[2].to_string(),
                amount: amount(p[3])?,
            },
            ("mine", 1) => Command::Mine,
            ("stake", 3) => Command::Stake {
                validator: p[1].to_string(),
                amount: amount(p[2])?,
            },
            ("delegate", 4) => Command::Delegate {
                delegator: p[1].to_string(),
                validator: p[2].to_string(),
                amount: amount(p[3])?,
            },
            ("balance", 1) | ("bal", 1) => Command::Balance(None),
            ("balance", 2) | ("bal", 2) => Command::Balance(Some(p[1].to_string())),
            ("validators", 1) => Command::Validators,
            ("chain", 1) => Command::Chain,
            ("pending", 1) => Command::Pending,
            ("sync", 1) => Command::Sync,
            ("status", 1) => Command::Status,
            ("help", _) => Command::Help,
            ("quit", 1) | ("exit", 1) => Command::Quit,
            ("send" | "mine" | "stake" | "delegate" | "balance" | "bal" | "validators"
            | "chain" | "pending" | "sync" | "status" | "quit" | "exit", _) => {
                return Err(format!("wrong number of arguments for '{}' (see 'help')", verb));
            }
            _ => return Err(format!("unknown command '{}' (see 'help')", verb)),
        };
        Ok(Some(command))
    }
}

/// Run a command against the service and render the reply.
pub async fn execute(service: &LedgerService, command: Command) -> String {
    match command {
        Command::Send { from, to, amount } => match service.submit_transfer(&from, &to, amount) {
            Ok(id) => format!(
                "📝 Queued {} -> {} ({}) [{}]. Balances change once it is sealed.",
                from,
                to,
                amount,
                short_hash(&id)
            ),
            Err(e) => format!("❌ {}", e),
        },
        Command::Mine => match service.produce_block().await {
            Ok(Some(block)) => format!(
                "⛏️  Sealed block #{} by {} with {} transaction(s) [{}]",
                block.index,
                block.producer.as_deref().unwrap_or("-"),
                block.transactions.len(),
                short_hash(&block.hash)
            ),
            Ok(None) => "📭 Nothing to seal.".to_string(),
            Err(NodeError::NoValidatorAvailable) => {
                "❌ No validator available. Stake first: stake <validator> <amount>".to_string()
            }
            Err(e) => format!("❌ {}", e),
        },
        Command::Stake { validator, amount } => match service.stake(&validator, amount) {
            Ok(total) => format!("🔒 {} now stakes {}", validator, total),
            Err(e) => format!("❌ {}", e),
        },
        Command::Delegate {
            delegator,
            validator,
            amount,
        } => match service.try_delegate(&delegator, &validator, amount) {
            Ok(total) => format!(
                "🤝 {} delegated {} to {} (effective stake {})",
                delegator, amount, validator, total
            ),
            Err(e) => format!("❌ {}", e),
        },
        Command::Balance(Some(account)) => {
            format!("📊 {}: {}", account, service.balance_of(&account))
        }
        Command::Balance(None) => {
            let balances = service.balances();
            if balances.is_empty() {
                return "📭 No accounts yet.".to_string();
            }
            let mut out = String::from("📊 Balances:");
            for (account, amount) in balances {
                let _ = write!(out, "\n  {:<20} {:>12}", account, amount);
            }
            out
        }
        Command::Validators => {
            let validators = service.validators();
            if validators.is_empty() {
                return "📭 No validators registered.".to_string();
            }
            let mut out = format!(
                "{:<20} | {:>12} | {:>12} | DELEGATORS",
                "VALIDATOR", "STAKE", "REWARD"
            );
            for v in validators {
                let _ = write!(
                    out,
                    "\n{:<20} | {:>12} | {:>12} | {}",
                    v.id,
                    v.stake,
                    v.reward,
                    v.delegators.join(", ")
                );
            }
            out
        }
        Command::Chain => {
            // One snapshot, so the verdict matches the blocks shown.
            let blocks = service.chain();
            let valid = verify_chain(&blocks);
            render_chain(&blocks, valid)
        }
        Command::Pending => {
            let pending = service.pending();
            if pending.is_empty() {
                return "📭 No pending transactions.".to_string();
            }
            let mut out = format!("⏳ {} pending:", pending.len());
            for tx in pending {
                let _ = write!(
                    out,
                    "\n  {} -> {} ({}) [{}]",
                    tx.sender,
                    tx.receiver,
                    tx.amount,
                    short_hash(&tx.id)
                );
            }
            out
        }
        Command::Sync => {
            if service.resolve_conflicts().await {
                format!("🔄 Adopted a longer peer chain (height {})", service.chain_len())
            } else {
                format!("✅ Local chain kept (height {})", service.chain_len())
            }
        }
        Command::Status => {
            let s = service.status();
            format!(
                "🆔 {}\n📏 Height: {} (tip {})\n✅ Valid: {}\n🔒 Validators: {} (total stake {})\n\
                 ⏳ Pending: {} (received {}, sealed {}, discarded {})\n👥 Peers: {}\n💾 Persistent: {}",
                s.node_id,
                s.height,
                short_hash(&s.tip_hash),
                s.chain_valid,
                s.validators,
                s.total_stake,
                s.pool.size,
                s.pool.total_received,
                s.pool.total_sealed,
                s.pool.total_discarded,
                if s.peers.is_empty() {
                    "none".to_string()
                } else {
                    s.peers.join(", ")
                },
                s.persistent
            )
        }
        Command::Help => HELP.to_string(),
        Command::Quit => "👋 Bye".to_string(),
    }
}

/// Explorer-style dump of every block, oldest first.
pub fn render_chain(blocks: &[Block], valid: bool) -> String {
    let rule = "+-------+----------------+----------------+--------------------+-----+";
    let mut out = format!("\n📜 CHAIN ({} blocks)\n{}\n", blocks.len(), rule);
    let _ = writeln!(
        out,
        "| {:<5} | {:<14} | {:<14} | {:<18} | {:>3} |",
        "INDEX", "HASH", "PREVIOUS", "PRODUCER", "TXS"
    );
    out.push_str(rule);

    for block in blocks {
        let _ = write!(
            out,
            "\n| {:<5} | {:<14} | {:<14} | {:<18} | {:>3} |",
            block.index,
            short_hash(&block.hash),
            short_hash(&block.previous_hash),
            block.producer.as_deref().unwrap_or(if block.is_genesis() {
                "genesis"
            } else {
                "-"
            }),
            block.transactions.len()
        );
        for tx in &block.transactions {
            let _ = write!(
                out,
                "\n|       |   {} -> {} ({})",
                tx.sender, tx.receiver, tx.amount
            );
        }
    }
    let _ = write!(
        out,
        "\n{}\n{}",
        rule,
        if valid {
            "✅ Chain valid"
        } else {
            "❌ Chain INVALID"
        }
    );
    out
}
