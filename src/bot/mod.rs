//! Twitch chat client.
//!
//! Connects to the Twitch IRC gateway, answers PING keepalives, and replies
//! to the handful of chat commands the bot supports. The connection is
//! re-established after any drop.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{error, info};

const IRC_ADDR: &str = "irc.chat.twitch.tv:6667";
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub username: String,
    /// Chat login token, sent as `oauth:<token>`.
    pub access_token: String,
    pub channel: String,
}

/// Run the chat client until the process exits, reconnecting on any drop.
pub async fn run(config: BotConfig) {
    loop {
        match connection(&config).await {
            Ok(()) => info!("Chat connection closed"),
            Err(e) => error!("Chat connection failed: {e}"),
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
        info!("Reconnecting to chat");
    }
}

async fn connection(config: &BotConfig) -> std::io::Result<()> {
    let stream = TcpStream::connect(IRC_ADDR).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let channel = config.channel.to_lowercase();
    writer
        .write_all(format!("PASS oauth:{}\r\n", config.access_token).as_bytes())
        .await?;
    writer
        .write_all(format!("NICK {}\r\n", config.username).as_bytes())
        .await?;
    writer
        .write_all(format!("JOIN #{channel}\r\n").as_bytes())
        .await?;
    info!("Connected to chat, joining #{channel}");

    while let Some(line) = lines.next_line().await? {
        if let Some(payload) = line.strip_prefix("PING ") {
            writer
                .write_all(format!("PONG {payload}\r\n").as_bytes())
                .await?;
            continue;
        }

        if let Some(message) = ChatMessage::parse(&line) {
            // Never answer our own messages
            if message.sender.eq_ignore_ascii_case(&config.username) {
                continue;
            }

            info!("[{}] <{}>: {}", message.channel, message.sender, message.text);

            if let Some(reply) = respond_to(&message) {
                writer
                    .write_all(
                        format!("PRIVMSG {} :{reply}\r\n", message.channel).as_bytes(),
                    )
                    .await?;
            }
        }
    }

    Ok(())
}

/// A PRIVMSG received from a joined channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub channel: String,
    pub text: String,
}

impl ChatMessage {
    /// Parse `:nick!user@host PRIVMSG #channel :text`. Anything else is None.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(':')?;
        let (prefix, rest) = rest.split_once(' ')?;
        let sender = prefix.split('!').next()?.to_string();

        let rest = rest.strip_prefix("PRIVMSG ")?;
        let (channel, text) = rest.split_once(" :")?;

        Some(Self {
            sender,
            channel: channel.to_string(),
            text: text.to_string(),
        })
    }
}

/// The bot's (deliberately tiny) command set.
fn respond_to(message: &ChatMessage) -> Option<String> {
    let text = message.text.to_lowercase();

    if text == "!ping" {
        return Some(format!("@{}, Pong!", message.sender));
    }

    if text.contains("bad bot") {
        return Some(format!("@{}, that's not very nice!", message.sender));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_channel_message() {
        let line = ":mecry!mecry@mecry.tmi.twitch.tv PRIVMSG #mecrytv :hello there";
        let message = ChatMessage::parse(line).unwrap();

        assert_eq!(message.sender, "mecry");
        assert_eq!(message.channel, "#mecrytv");
        assert_eq!(message.text, "hello there");
    }

    #[test]
    fn ignores_non_privmsg_lines() {
        assert!(ChatMessage::parse("PING :tmi.twitch.tv").is_none());
        assert!(ChatMessage::parse(":tmi.twitch.tv 001 bot :Welcome, GLHF!").is_none());
    }

    #[test]
    fn ping_command_gets_a_pong() {
        let message = ChatMessage::parse(
            ":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #mecrytv :!PING",
        )
        .unwrap();

        assert_eq!(respond_to(&message).as_deref(), Some("@viewer, Pong!"));
    }

    #[test]
    fn ordinary_chatter_gets_no_reply() {
        let message = ChatMessage::parse(
            ":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #mecrytv :good evening",
        )
        .unwrap();

        assert!(respond_to(&message).is_none());
    }
}
