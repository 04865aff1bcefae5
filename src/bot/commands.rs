//! Comandos de chat con prefijo.
//!
//! `!<nombre>` reproduce un comando subido; el resto son palabras
//! reservadas. Acá solo se parsea; la ejecución vive en `handlers`.

use crate::error::PlaybackError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Play(String),
    Random,
    Leave,
    Rewind,
    Loop(String),
    /// Sin nombre aplica a lo que suena.
    Speed {
        name: Option<String>,
        value: String,
    },
    /// Sin SoundFont lista los disponibles.
    Soundfont {
        name: Option<String>,
        soundfont: Option<String>,
    },
    Eq(EqCommand),
    Description {
        name: String,
        text: String,
    },
    Remove(String),
    List,
}

/// `!eq` siempre actúa sobre lo que suena en la guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EqCommand {
    Show,
    Volume(String),
    Bass(String),
    Treble(String),
    Preset(String),
    Raw(String),
    Reset,
}

const EQ_USAGE: &str =
    "Uso: `eq`, `eq volume|bass|treble <porcentaje>`, `eq preset <nombre>`, `eq raw <filtro>`, `eq reset`";

fn usage(text: &str) -> PlaybackError {
    PlaybackError::user_input(format!("Uso: `{text}`"))
}

/// `None` si el mensaje no empieza con el prefijo o está vacío.
pub fn parse(prefix: &str, content: &str) -> Option<Result<BotCommand, PlaybackError>> {
    let body = content.trim().strip_prefix(prefix)?.trim_start();
    let (word, rest) = match body.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (body, ""),
    };
    if word.is_empty() {
        return None;
    }
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match word.to_lowercase().as_str() {
        "random" => Ok(BotCommand::Random),
        "leave" | "stop" => Ok(BotCommand::Leave),
        "rewind" => Ok(BotCommand::Rewind),
        "list" => Ok(BotCommand::List),
        "loop" => match args.as_slice() {
            [name] => Ok(BotCommand::Loop(name.to_string())),
            _ => Err(usage("loop <nombre>")),
        },
        "speed" => match args.as_slice() {
            [value] => Ok(BotCommand::Speed {
                name: None,
                value: value.to_string(),
            }),
            [name, value] => Ok(BotCommand::Speed {
                name: Some(name.to_string()),
                value: value.to_string(),
            }),
            _ => Err(usage("speed [nombre] <porcentaje>")),
        },
        "sf" => match args.as_slice() {
            [] => Ok(BotCommand::Soundfont {
                name: None,
                soundfont: None,
            }),
            [soundfont] => Ok(BotCommand::Soundfont {
                name: None,
                soundfont: Some(soundfont.to_string()),
            }),
            [name, soundfont] => Ok(BotCommand::Soundfont {
                name: Some(name.to_string()),
                soundfont: Some(soundfont.to_string()),
            }),
            _ => Err(usage("sf [nombre] [soundfont]")),
        },
        "eq" => parse_eq(rest).map(BotCommand::Eq),
        "description" => match rest.split_once(char::is_whitespace) {
            Some((name, text)) if !text.trim().is_empty() => Ok(BotCommand::Description {
                name: name.to_string(),
                text: text.trim().to_string(),
            }),
            _ => Err(usage("description <nombre> <texto>")),
        },
        "aremove" => match args.as_slice() {
            [name] => Ok(BotCommand::Remove(name.to_string())),
            _ => Err(usage("aremove <nombre>")),
        },
        _ => Ok(BotCommand::Play(word.to_string())),
    };
    Some(command)
}

fn parse_eq(rest: &str) -> Result<EqCommand, PlaybackError> {
    let (sub, arg) = match rest.split_once(char::is_whitespace) {
        Some((sub, arg)) => (sub, arg.trim()),
        None => (rest, ""),
    };

    let with_arg = |build: fn(String) -> EqCommand| {
        if arg.is_empty() {
            Err(PlaybackError::user_input(EQ_USAGE))
        } else {
            Ok(build(arg.to_string()))
        }
    };

    match sub.to_lowercase().as_str() {
        "" => Ok(EqCommand::Show),
        "reset" => Ok(EqCommand::Reset),
        "volume" => with_arg(EqCommand::Volume),
        "bass" => with_arg(EqCommand::Bass),
        "treble" => with_arg(EqCommand::Treble),
        "preset" => with_arg(EqCommand::Preset),
        // El filtro puede tener espacios
        "raw" => with_arg(EqCommand::Raw),
        _ => Err(PlaybackError::user_input(EQ_USAGE)),
    }
}

/// Parte una respuesta larga en mensajes que Discord acepta.
pub fn split_reply(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if !current.is_empty() && current.chars().count() + line.chars().count() + 1 > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        // Una línea sola más larga que el límite se corta a la fuerza
        let mut line: String = line.to_string();
        while line.chars().count() > limit {
            let head: String = line.chars().take(limit).collect();
            line = line.chars().skip(limit).collect();
            chunks.push(head);
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ok(content: &str) -> BotCommand {
        parse("!", content)
            .expect("mensaje con prefijo")
            .expect("comando válido")
    }

    #[test]
    fn test_non_commands_are_ignored() {
        assert!(parse("!", "hola").is_none());
        assert!(parse("!", "!").is_none());
        assert!(parse("!", "!   ").is_none());
    }

    #[test]
    fn test_reserved_words_and_names() {
        assert_eq!(ok("!alarm"), BotCommand::Play("alarm".into()));
        assert_eq!(ok("  !RANDOM "), BotCommand::Random);
        assert_eq!(ok("!stop"), BotCommand::Leave);
        assert_eq!(ok("!leave"), BotCommand::Leave);
        assert_eq!(ok("!rewind"), BotCommand::Rewind);
        assert_eq!(ok("!loop lofi"), BotCommand::Loop("lofi".into()));
        assert_eq!(ok("!aremove lofi"), BotCommand::Remove("lofi".into()));
        assert_eq!(parse(">>", ">>list").and_then(Result::ok), Some(BotCommand::List));
    }

    #[test]
    fn test_optional_name_arguments() {
        assert_eq!(
            ok("!speed 150%"),
            BotCommand::Speed {
                name: None,
                value: "150%".into()
            }
        );
        assert_eq!(
            ok("!speed lofi 1.5x"),
            BotCommand::Speed {
                name: Some("lofi".into()),
                value: "1.5x".into()
            }
        );
        assert_eq!(
            ok("!sf"),
            BotCommand::Soundfont {
                name: None,
                soundfont: None
            }
        );
        assert_eq!(
            ok("!sf gm"),
            BotCommand::Soundfont {
                name: None,
                soundfont: Some("gm".into())
            }
        );
        assert_eq!(
            ok("!sf tune gm"),
            BotCommand::Soundfont {
                name: Some("tune".into()),
                soundfont: Some("gm".into())
            }
        );
    }

    #[test]
    fn test_eq_subcommands() {
        assert_eq!(ok("!eq"), BotCommand::Eq(EqCommand::Show));
        assert_eq!(ok("!eq bass 150"), BotCommand::Eq(EqCommand::Bass("150".into())));
        assert_eq!(
            ok("!eq raw aecho=0.8:0.9:1000:0.3, volume=2"),
            BotCommand::Eq(EqCommand::Raw("aecho=0.8:0.9:1000:0.3, volume=2".into()))
        );
        assert_eq!(ok("!eq Reset"), BotCommand::Eq(EqCommand::Reset));
        assert!(parse("!", "!eq volume").unwrap().is_err());
        assert!(parse("!", "!eq flanger 3").unwrap().is_err());
    }

    #[test]
    fn test_description_keeps_spaces() {
        assert_eq!(
            ok("!description lofi  beats  para estudiar "),
            BotCommand::Description {
                name: "lofi".into(),
                text: "beats  para estudiar".into()
            }
        );
        assert!(parse("!", "!description lofi").unwrap().is_err());
        assert!(parse("!", "!speed a b c").unwrap().is_err());
    }

    #[test]
    fn test_split_reply() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_reply(text, 9), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(split_reply("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert!(split_reply("", 10).is_empty());
    }
}
