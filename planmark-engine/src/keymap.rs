/// 键盘快捷键对应的动作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortcutAction {
    Undo,
    Redo,
    Rotate,
    ResetView,
    Cancel,
}

impl ShortcutAction {
    pub fn name(self) -> &'static str {
        match self {
            ShortcutAction::Undo => "undo",
            ShortcutAction::Redo => "redo",
            ShortcutAction::Rotate => "rotate",
            ShortcutAction::ResetView => "reset_view",
            ShortcutAction::Cancel => "cancel",
        }
    }
}

/// 按键时的修饰键状态。`meta` 对应 macOS 的 Cmd。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    /// 解析 `ctrl+shift+z` 形式中的修饰键部分，返回修饰键与剩余的按键名。
    pub fn parse_chord(chord: &str) -> (Self, String) {
        let mut modifiers = Self::default();
        let mut key = String::new();
        for part in chord.split('+').map(str::trim).filter(|part| !part.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => modifiers.ctrl = true,
                "shift" => modifiers.shift = true,
                "cmd" | "meta" | "super" => modifiers.meta = true,
                _ => key = part.to_string(),
            }
        }
        (modifiers, key)
    }

    #[inline]
    fn command(self) -> bool {
        self.ctrl || self.meta
    }
}

/// 将按键映射为动作：Ctrl/Cmd+Z 撤销，Ctrl/Cmd+Shift+Z 或 Ctrl+Y 重做，
/// R 旋转，F / Home 重置视图，Escape 取消。
pub fn resolve_shortcut(key: &str, modifiers: Modifiers) -> Option<ShortcutAction> {
    let key = key.to_ascii_lowercase();
    match key.as_str() {
        "z" if modifiers.command() && modifiers.shift => Some(ShortcutAction::Redo),
        "z" if modifiers.command() => Some(ShortcutAction::Undo),
        "y" if modifiers.ctrl && !modifiers.shift => Some(ShortcutAction::Redo),
        "r" if !modifiers.command() => Some(ShortcutAction::Rotate),
        "f" if !modifiers.command() => Some(ShortcutAction::ResetView),
        "home" => Some(ShortcutAction::ResetView),
        "escape" | "esc" => Some(ShortcutAction::Cancel),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord(text: &str) -> Option<ShortcutAction> {
        let (modifiers, key) = Modifiers::parse_chord(text);
        resolve_shortcut(&key, modifiers)
    }

    #[test]
    fn undo_redo_chords() {
        assert_eq!(chord("ctrl+z"), Some(ShortcutAction::Undo));
        assert_eq!(chord("cmd+z"), Some(ShortcutAction::Undo));
        assert_eq!(chord("ctrl+shift+z"), Some(ShortcutAction::Redo));
        assert_eq!(chord("Cmd+Shift+Z"), Some(ShortcutAction::Redo));
        assert_eq!(chord("ctrl+y"), Some(ShortcutAction::Redo));
        assert_eq!(chord("z"), None);
    }

    #[test]
    fn tool_and_view_keys() {
        assert_eq!(chord("r"), Some(ShortcutAction::Rotate));
        assert_eq!(chord("ctrl+r"), None);
        assert_eq!(chord("f"), Some(ShortcutAction::ResetView));
        assert_eq!(chord("Home"), Some(ShortcutAction::ResetView));
        assert_eq!(chord("Escape"), Some(ShortcutAction::Cancel));
        assert_eq!(chord("q"), None);
    }
}
