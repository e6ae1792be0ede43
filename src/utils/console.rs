use crate::exchanges::deribit::{
    channel_name, BookDepth, Direction, LinkedOrderType, OrderRequest, OrderType, TimeInForce,
    Trigger,
};
use clap::{Args, CommandFactory, Parser, Subcommand};

/// One line typed at the interactive prompt
#[derive(Debug, Parser)]
#[command(
    name = "tradelink",
    no_binary_name = true,
    disable_help_flag = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
#[command(rename_all = "snake_case")]
pub enum Command {
    /// Show available commands
    Help,
    /// Connect to the WebSocket API and authenticate
    Connect {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        path: Option<String>,
    },
    /// Send the authentication request again
    Auth,
    /// Place a new order
    Place(PlaceArgs),
    /// Cancel an order
    Cancel {
        #[arg(long = "order_id")]
        order_id: String,
    },
    /// Get the order book for an instrument
    GetOrderBook {
        #[arg(long = "instrument_name")]
        instrument_name: String,
        /// One of 1, 5, 10, 20, 50, 100, 1000, 10000
        #[arg(long)]
        depth: BookDepth,
    },
    /// Subscribe to channels for one or more instruments
    Subscribe {
        #[arg(long = "channel", num_args = 1.., required = true)]
        channels: Vec<String>,
        #[arg(long = "instrument_name", num_args = 1.., required = true)]
        instruments: Vec<String>,
        /// Notification interval suffix, e.g. 100ms or raw
        #[arg(long)]
        interval: Option<String>,
    },
    /// Unsubscribe from every channel
    UnsubscribeAll,
    /// Show connection state, authentication and traffic counters
    Status,
    /// Close the current session
    Close,
    /// Exit the program
    Exit,
}

#[derive(Debug, Clone, PartialEq, Args)]
pub struct PlaceArgs {
    #[arg(long)]
    pub direction: Direction,
    #[arg(long = "instrument_name")]
    pub instrument_name: String,
    #[arg(long = "type", default_value = "limit")]
    pub order_type: OrderType,
    #[arg(long)]
    pub amount: Option<f64>,
    #[arg(long)]
    pub contracts: Option<f64>,
    #[arg(long)]
    pub price: Option<f64>,
    /// Tick size 0.1
    #[arg(long = "trigger_price")]
    pub trigger_price: Option<f64>,
    #[arg(long)]
    pub trigger: Option<Trigger>,
    /// At most 64 characters
    #[arg(long)]
    pub label: Option<String>,
    #[arg(long = "post_only")]
    pub post_only: Option<bool>,
    #[arg(long = "reject_post_only")]
    pub reject_post_only: Option<bool>,
    #[arg(long)]
    pub mmp: Option<bool>,
    #[arg(long = "reduce_only")]
    pub reduce_only: Option<bool>,
    #[arg(long = "time_in_force")]
    pub time_in_force: Option<TimeInForce>,
    #[arg(long = "max_show")]
    pub max_show: Option<f64>,
    #[arg(long = "valid_until")]
    pub valid_until: Option<i64>,
    #[arg(long = "trigger_offset")]
    pub trigger_offset: Option<f64>,
    #[arg(long = "linked_order_type")]
    pub linked_order_type: Option<LinkedOrderType>,
}

impl From<PlaceArgs> for OrderRequest {
    fn from(args: PlaceArgs) -> Self {
        Self {
            direction: Some(args.direction),
            instrument_name: args.instrument_name,
            order_type: args.order_type,
            amount: args.amount,
            contracts: args.contracts,
            price: args.price,
            trigger_price: args.trigger_price,
            trigger: args.trigger,
            label: args.label,
            post_only: args.post_only,
            reject_post_only: args.reject_post_only,
            mmp: args.mmp,
            reduce_only: args.reduce_only,
            time_in_force: args.time_in_force,
            max_show: args.max_show,
            valid_until: args.valid_until,
            trigger_offset: args.trigger_offset,
            linked_order_type: args.linked_order_type,
        }
    }
}

/// Every `channel.instrument[.interval]` combination
pub fn subscription_channels(
    channels: &[String],
    instruments: &[String],
    interval: Option<&str>,
) -> Vec<String> {
    channels
        .iter()
        .flat_map(|channel| {
            instruments
                .iter()
                .map(move |instrument| channel_name(channel, instrument, interval))
        })
        .collect()
}

/// Parse one prompt line. Returns `Ok(None)` for blank input.
///
/// A leading `deribit` word and dashes before the command name are accepted,
/// so `deribit --connect` and `connect` are the same command.
pub fn parse_line(line: &str) -> Result<Option<Command>, clap::Error> {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    if words.first() == Some(&"deribit") {
        words.remove(0);
    }
    let Some(&first) = words.first() else {
        return Ok(None);
    };
    let name = first.trim_start_matches('-');
    words[0] = if name == "h" { "help" } else { name };

    CommandLine::try_parse_from(words).map(|line| Some(line.command))
}

pub fn help_text() -> String {
    CommandLine::command().render_long_help().to_string()
}
