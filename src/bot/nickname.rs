//! Apodo del bot mientras suena un comando: `!nombre | Base`.

/// Límite de Discord para apodos.
pub const NICKNAME_LIMIT: usize = 32;

const ELLIPSIS: &str = "...";

/// Nombre base: lo que sigue al `|` si el apodo ya tiene estado.
pub fn base_name(current: &str) -> &str {
    match current.split_once('|') {
        Some((_, base)) => base.trim(),
        None => current,
    }
}

/// Apodo nuevo a partir del actual y la etiqueta de estado.
///
/// Sin etiqueta vuelve al nombre base. Si la etiqueta no entra se recorta
/// con `...`; si ni siquiera entra el sufijo queda el nombre base.
pub fn compose(current: &str, label: Option<&str>) -> String {
    let base = base_name(current);
    let Some(label) = label else {
        return base.to_string();
    };

    let suffix = format!(" | {base}");
    let Some(room) = NICKNAME_LIMIT.checked_sub(suffix.chars().count()).filter(|room| *room > 0) else {
        return base.to_string();
    };

    let label = if label.chars().count() > room {
        let keep = room.saturating_sub(ELLIPSIS.len());
        let mut cut: String = label.chars().take(keep).collect();
        cut.push_str(ELLIPSIS);
        cut.chars().take(room).collect()
    } else {
        label.to_string()
    };

    format!("{label}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("Espionage"), "Espionage");
        assert_eq!(base_name("!alarm | Espionage"), "Espionage");
        assert_eq!(base_name("📁 !lofi | Espionage"), "Espionage");
    }

    #[test]
    fn test_compose_and_clear() {
        assert_eq!(compose("Espionage", Some("!alarm")), "!alarm | Espionage");
        assert_eq!(compose("!alarm | Espionage", Some("📁 !lofi")), "📁 !lofi | Espionage");
        assert_eq!(compose("!alarm | Espionage", None), "Espionage");
    }

    #[test]
    fn test_long_labels_are_truncated() {
        let nick = compose("Espionage", Some("!a_really_long_command_name_here"));
        assert_eq!(nick.chars().count(), NICKNAME_LIMIT);
        assert!(nick.starts_with("!a_really_long..."));
        assert!(nick.ends_with(" | Espionage"));
    }

    #[test]
    fn test_huge_base_name_keeps_base() {
        let base = "B".repeat(30);
        assert_eq!(compose(&base, Some("!x")), base);
    }
}
