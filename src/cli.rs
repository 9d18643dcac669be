use anyhow::Context;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use rand::Rng;
use tracing::debug;

use crate::endpoint::Namespace;
use crate::protocol::WireMessage;
use crate::sender::{self, DeliveryMode};

#[derive(Parser, Debug)]
#[command(
    name = "gopher",
    version,
    about = "Desktop gopher that walks along the bottom of your screen",
    long_about = "Run without flags to start a gopher. With flags, send commands to the \
                  gophers already running on this machine and exit."
)]
pub struct Cli {
    /// Make every running gopher jump. Repeatable.
    #[arg(short = 'j', long = "jump", num_args = 0, default_missing_value = "true")]
    pub jump: Vec<bool>,

    /// Close every running gopher.
    #[arg(short = 'x', long = "close", num_args = 0, default_missing_value = "true")]
    pub close: Vec<bool>,

    /// Make one randomly chosen gopher say TEXT. Repeatable.
    #[arg(short = 'm', long = "message", value_name = "TEXT")]
    pub message: Vec<String>,

    /// Put accessory INDEX on one randomly chosen gopher. 0 or no INDEX hides it.
    #[arg(
        short = 'a',
        long = "accessory",
        value_name = "INDEX",
        num_args = 0..=1,
        default_missing_value = "0",
        allow_negative_numbers = true
    )]
    pub accessory: Vec<i64>,

    /// Start the gopher without a window (behavior and command channel only).
    #[arg(long)]
    pub headless: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SenderAction {
    Jump,
    Close,
    Message(String),
    Accessory(i64),
}

impl SenderAction {
    pub fn wire(&self) -> WireMessage {
        match self {
            SenderAction::Jump => WireMessage::jump(),
            SenderAction::Close => WireMessage::close(),
            SenderAction::Message(text) => WireMessage::message(text.clone()),
            SenderAction::Accessory(index) => WireMessage::accessory(*index),
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        match self {
            SenderAction::Jump | SenderAction::Close => DeliveryMode::Broadcast,
            SenderAction::Message(_) | SenderAction::Accessory(_) => DeliveryMode::Race,
        }
    }
}

pub struct Invocation {
    pub headless: bool,
    /// Sender actions in command-line order. Empty means "run a gopher".
    pub actions: Vec<SenderAction>,
}

impl Invocation {
    /// Parse the process arguments; exits on `--help` or usage errors.
    pub fn parse() -> Self {
        let matches = Cli::command().get_matches();
        match Self::from_matches(&matches) {
            Ok(invocation) => invocation,
            Err(e) => e.exit(),
        }
    }

    /// Flags may repeat and mix; every occurrence becomes one action, ordered
    /// by where it appeared on the command line.
    fn from_matches(matches: &ArgMatches) -> Result<Self, clap::Error> {
        let cli = Cli::from_arg_matches(matches)?;

        let mut ordered = Vec::new();
        let mut place = |id: &str, actions: Vec<SenderAction>| {
            let positions: Vec<usize> = matches
                .indices_of(id)
                .map(|indices| indices.collect())
                .unwrap_or_default();
            for (n, action) in actions.into_iter().enumerate() {
                let at = positions.get(n).copied().unwrap_or(usize::MAX);
                ordered.push((at, action));
            }
        };
        place("jump", vec![SenderAction::Jump; cli.jump.len()]);
        place("close", vec![SenderAction::Close; cli.close.len()]);
        place(
            "message",
            cli.message.into_iter().map(SenderAction::Message).collect(),
        );
        place(
            "accessory",
            cli.accessory
                .into_iter()
                .map(SenderAction::Accessory)
                .collect(),
        );
        ordered.sort_by_key(|(at, _)| *at);

        Ok(Self {
            headless: cli.headless,
            actions: ordered.into_iter().map(|(_, action)| action).collect(),
        })
    }
}

/// Deliver every action in order. Unreachable gophers are logged by the
/// sender; only a namespace that cannot be listed is an error.
pub async fn dispatch_actions(
    namespace: &Namespace,
    actions: &[SenderAction],
    rng: &mut impl Rng,
) -> anyhow::Result<()> {
    for action in actions {
        let delivered = sender::send(namespace, &action.wire(), action.mode(), rng)
            .await
            .with_context(|| format!("listing {}", namespace.dir().display()))?;
        debug!(?action, delivered, "command sent");
    }
    Ok(())
}
