//! Clasificación de cambios de estado de voz.
//!
//! Sin dependencias de Discord: el handler arma la transición y los conteos
//! desde la cache y despacha las acciones resultantes.

use serenity::model::id::ChannelId;

/// Un cambio de canal de un miembro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceTransition {
    /// El miembro es el propio bot.
    pub is_self: bool,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
    /// Canal AFK de la guild, si tiene.
    pub afk_channel: Option<ChannelId>,
    /// Silenciado por el servidor.
    pub muted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceAction {
    /// Al bot lo desconectaron por fuera de la sesión.
    BotDisconnected,
    /// El bot quedó solo en su canal.
    LeaveAlone,
    /// Un único miembro quedó en `channel`; `from` es su canal anterior.
    Occupied {
        channel: ChannelId,
        from: Option<ChannelId>,
    },
    /// Alguien entró al canal del bot y quedaron bot + 1.
    Nudge { channel: ChannelId },
    /// Más de un miembro junto al bot.
    Crowded { channel: ChannelId },
    /// Un miembro entró al canal AFK: el bot lo sigue.
    JoinedAfk { channel: ChannelId },
    /// Al bot lo silenciaron o lo mandaron al canal AFK.
    Unmute,
}

/// Acciones para una transición. `occupants` cuenta miembros que no son
/// bots en un canal.
pub fn classify(
    transition: VoiceTransition,
    bot_channel: Option<ChannelId>,
    occupants: impl Fn(ChannelId) -> usize,
) -> Vec<VoiceAction> {
    if transition.is_self {
        return match transition.new_channel {
            None => vec![VoiceAction::BotDisconnected],
            Some(channel) if transition.muted || transition.afk_channel == Some(channel) => {
                vec![VoiceAction::Unmute]
            }
            Some(_) => Vec::new(),
        };
    }

    let mut actions = Vec::new();
    if let Some(bot) = bot_channel {
        if occupants(bot) == 0 {
            actions.push(VoiceAction::LeaveAlone);
        }
    }

    if transition.old_channel == transition.new_channel {
        return actions;
    }
    let Some(channel) = transition.new_channel else {
        return actions;
    };

    if transition.afk_channel == Some(channel) {
        actions.push(VoiceAction::JoinedAfk { channel });
        return actions;
    }

    let count = occupants(channel);
    if bot_channel == Some(channel) {
        match count {
            1 => actions.push(VoiceAction::Nudge { channel }),
            n if n > 1 => actions.push(VoiceAction::Crowded { channel }),
            _ => {}
        }
    } else if count == 1 {
        actions.push(VoiceAction::Occupied {
            channel,
            from: transition.old_channel,
        });
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    const BOT_ROOM: ChannelId = ChannelId::new(1);
    const LOBBY: ChannelId = ChannelId::new(2);
    const QUIET: ChannelId = ChannelId::new(3);
    const AFK: ChannelId = ChannelId::new(4);

    fn counts(pairs: &[(ChannelId, usize)]) -> impl Fn(ChannelId) -> usize {
        let map: HashMap<_, _> = pairs.iter().copied().collect();
        move |channel| map.get(&channel).copied().unwrap_or(0)
    }

    fn member(old: Option<ChannelId>, new: Option<ChannelId>) -> VoiceTransition {
        VoiceTransition {
            is_self: false,
            old_channel: old,
            new_channel: new,
            afk_channel: Some(AFK),
            muted: false,
        }
    }

    fn bot(old: Option<ChannelId>, new: Option<ChannelId>) -> VoiceTransition {
        VoiceTransition {
            is_self: true,
            ..member(old, new)
        }
    }

    #[test]
    fn test_bot_transitions() {
        let gone = bot(Some(BOT_ROOM), None);
        assert_eq!(classify(gone, None, counts(&[])), vec![VoiceAction::BotDisconnected]);

        let moved = bot(Some(BOT_ROOM), Some(LOBBY));
        assert!(classify(moved, Some(LOBBY), counts(&[])).is_empty());
    }

    #[test]
    fn test_bot_unmutes_itself() {
        let sent_to_afk = bot(Some(BOT_ROOM), Some(AFK));
        assert_eq!(classify(sent_to_afk, Some(AFK), counts(&[])), vec![VoiceAction::Unmute]);

        let muted = VoiceTransition {
            muted: true,
            ..bot(Some(BOT_ROOM), Some(BOT_ROOM))
        };
        assert_eq!(classify(muted, Some(BOT_ROOM), counts(&[])), vec![VoiceAction::Unmute]);

        // Sin canal AFK configurado no hay nada que hacer
        let no_afk = VoiceTransition {
            afk_channel: None,
            ..bot(Some(BOT_ROOM), Some(AFK))
        };
        assert!(classify(no_afk, Some(AFK), counts(&[])).is_empty());
    }

    #[test]
    fn test_member_joining_afk_is_followed() {
        let actions = classify(member(Some(LOBBY), Some(AFK)), None, counts(&[(AFK, 1)]));
        assert_eq!(actions, vec![VoiceAction::JoinedAfk { channel: AFK }]);

        // Ni Occupied ni Nudge aunque quede solo o junto al bot
        let with_bot = classify(member(None, Some(AFK)), Some(AFK), counts(&[(AFK, 1)]));
        assert_eq!(with_bot, vec![VoiceAction::JoinedAfk { channel: AFK }]);

        // El bot quedó solo al irse el miembro al AFK
        let left_bot = classify(
            member(Some(BOT_ROOM), Some(AFK)),
            Some(BOT_ROOM),
            counts(&[(AFK, 1)]),
        );
        assert_eq!(
            left_bot,
            vec![VoiceAction::LeaveAlone, VoiceAction::JoinedAfk { channel: AFK }]
        );
    }

    #[test]
    fn test_last_member_leaving_leaves_bot_alone() {
        let actions = classify(member(Some(BOT_ROOM), None), Some(BOT_ROOM), counts(&[]));
        assert_eq!(actions, vec![VoiceAction::LeaveAlone]);
    }

    #[test]
    fn test_joining_empty_channel_is_occupied() {
        let actions = classify(
            member(None, Some(QUIET)),
            Some(BOT_ROOM),
            counts(&[(BOT_ROOM, 2), (QUIET, 1)]),
        );
        assert_eq!(
            actions,
            vec![VoiceAction::Occupied {
                channel: QUIET,
                from: None
            }]
        );

        let moved = classify(
            member(Some(LOBBY), Some(QUIET)),
            None,
            counts(&[(QUIET, 1)]),
        );
        assert_eq!(
            moved,
            vec![VoiceAction::Occupied {
                channel: QUIET,
                from: Some(LOBBY)
            }]
        );
    }

    #[test]
    fn test_joining_bot_channel() {
        let nudge = classify(
            member(None, Some(BOT_ROOM)),
            Some(BOT_ROOM),
            counts(&[(BOT_ROOM, 1)]),
        );
        assert_eq!(nudge, vec![VoiceAction::Nudge { channel: BOT_ROOM }]);

        let crowded = classify(
            member(Some(LOBBY), Some(BOT_ROOM)),
            Some(BOT_ROOM),
            counts(&[(BOT_ROOM, 2)]),
        );
        assert_eq!(crowded, vec![VoiceAction::Crowded { channel: BOT_ROOM }]);
    }

    #[test]
    fn test_mute_toggle_is_ignored() {
        let actions = classify(
            member(Some(LOBBY), Some(LOBBY)),
            Some(BOT_ROOM),
            counts(&[(BOT_ROOM, 1), (LOBBY, 1)]),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_leaving_crowded_channel_to_bot_alone() {
        // El único acompañante se va a otro canal vacío
        let actions = classify(
            member(Some(BOT_ROOM), Some(QUIET)),
            Some(BOT_ROOM),
            counts(&[(QUIET, 1)]),
        );
        assert_eq!(
            actions,
            vec![
                VoiceAction::LeaveAlone,
                VoiceAction::Occupied {
                    channel: QUIET,
                    from: Some(BOT_ROOM)
                }
            ]
        );
    }
}
