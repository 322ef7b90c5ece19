use crate::app::Scene;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use petroom::ActionKind;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UiAction {
    Quit,
    Perform(ActionKind),
    ShopToggle,
    ShopMove(i32),
    Buy,
    EquipToggle,
    HelpToggle,
    Back,
}

#[derive(Clone, Debug)]
pub(crate) struct InputEvent {
    pub(crate) key: KeyCode,
    pub(crate) mods: KeyModifiers,
}

pub(crate) fn collect_input_nonblocking(
    max_frame_time: Duration,
) -> anyhow::Result<Vec<InputEvent>> {
    let mut out = Vec::new();

    let timeout = std::cmp::min(Duration::from_millis(1), max_frame_time);
    while event::poll(timeout)? {
        if let Event::Key(k) = event::read()? {
            if k.kind == KeyEventKind::Press {
                out.push(InputEvent {
                    key: k.code,
                    mods: k.modifiers,
                });
                if out.len() >= 32 {
                    break;
                }
            }
        }
    }
    Ok(out)
}

pub(crate) fn map_event_to_action(scene: Scene, ev: InputEvent) -> Option<UiAction> {
    if ev.mods.contains(KeyModifiers::CONTROL) && ev.key == KeyCode::Char('c') {
        return Some(UiAction::Quit);
    }
    match ev.key {
        KeyCode::Char('q') | KeyCode::Char('Q') => return Some(UiAction::Quit),
        KeyCode::Char('h') | KeyCode::Char('H') => return Some(UiAction::HelpToggle),
        KeyCode::Esc => return Some(UiAction::Back),
        KeyCode::Tab => return Some(UiAction::ShopToggle),
        _ => {}
    }

    match scene {
        Scene::Room => match ev.key {
            KeyCode::Char('f') | KeyCode::Char('F') => Some(UiAction::Perform(ActionKind::Feed)),
            KeyCode::Char('c') | KeyCode::Char('C') => Some(UiAction::Perform(ActionKind::Clean)),
            KeyCode::Char('s') | KeyCode::Char('S') => Some(UiAction::Perform(ActionKind::Sleep)),
            KeyCode::Char('p') | KeyCode::Char('P') => Some(UiAction::Perform(ActionKind::Play)),
            _ => None,
        },
        Scene::Shop => match ev.key {
            KeyCode::Up => Some(UiAction::ShopMove(-1)),
            KeyCode::Down => Some(UiAction::ShopMove(1)),
            KeyCode::Enter | KeyCode::Char('b') | KeyCode::Char('B') => Some(UiAction::Buy),
            KeyCode::Char('e') | KeyCode::Char('E') => Some(UiAction::EquipToggle),
            _ => None,
        },
        Scene::Help => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> InputEvent {
        InputEvent {
            key: code,
            mods: KeyModifiers::NONE,
        }
    }

    #[test]
    fn room_keys_map_to_actions() {
        assert_eq!(
            map_event_to_action(Scene::Room, key(KeyCode::Char('p'))),
            Some(UiAction::Perform(ActionKind::Play))
        );
        assert_eq!(map_event_to_action(Scene::Room, key(KeyCode::Enter)), None);
    }

    #[test]
    fn shop_keys_do_not_trigger_actions() {
        assert_eq!(
            map_event_to_action(Scene::Shop, key(KeyCode::Char('f'))),
            None
        );
        assert_eq!(
            map_event_to_action(Scene::Shop, key(KeyCode::Enter)),
            Some(UiAction::Buy)
        );
    }
}
