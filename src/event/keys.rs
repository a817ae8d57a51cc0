//! X11 keysym → key name mapping for recorded key events.
//!
//! Named keys render as `[Name]`; printable keysyms render as their character.
//! The physical form folds US-layout shifted characters onto the key that
//! produces them (`'A'` → `'a'`, `'!'` → `'1'`).

/// Name for a keysym that has no printable form.
fn special_key_name(keysym: u32) -> Option<&'static str> {
    let name = match keysym {
        0xff08 => "[BackSpace]",
        0xff09 => "[Tab]",
        0xff0d => "[Return]",
        0xff1b => "[Escape]",
        0xff63 => "[Insert]",
        0xffff => "[Delete]",
        0xff50 => "[Home]",
        0xff57 => "[End]",
        0xff55 => "[PageUp]",
        0xff56 => "[PageDown]",
        0xff51 => "[Left]",
        0xff52 => "[Up]",
        0xff53 => "[Right]",
        0xff54 => "[Down]",
        0xffbe => "[F1]", 0xffbf => "[F2]",
        0xffc0 => "[F3]", 0xffc1 => "[F4]",
        0xffc2 => "[F5]", 0xffc3 => "[F6]",
        0xffc4 => "[F7]", 0xffc5 => "[F8]",
        0xffc6 => "[F9]", 0xffc7 => "[F10]",
        0xffc8 => "[F11]", 0xffc9 => "[F12]",
        0xffca => "[F13]", 0xffcb => "[F14]",
        0xffcc => "[F15]", 0xffcd => "[F16]",
        0xffce => "[F17]", 0xffcf => "[F18]",
        0xffd0 => "[F19]", 0xffd1 => "[F20]",
        0xffe1 => "[ShiftLeft]",
        0xffe2 => "[ShiftRight]",
        0xffe3 => "[ControlLeft]",
        0xffe4 => "[ControlRight]",
        0xffe7 => "[MetaLeft]",
        0xffe8 => "[MetaRight]",
        0xffe9 => "[AltLeft]",
        0xffea => "[AltRight]",
        0xff14 => "[Scroll_Lock]",
        0xff15 => "[Sys_Req]",
        0xff7f => "[Num_Lock]",
        0xffe5 => "[Caps_Lock]",
        0xff13 => "[Pause]",
        0xffeb => "[Super_L]",
        0xffec => "[Super_R]",
        0xffed => "[Hyper_L]",
        0xffee => "[Hyper_R]",
        0xffb0 => "[KP_0]", 0xffb1 => "[KP_1]",
        0xffb2 => "[KP_2]", 0xffb3 => "[KP_3]",
        0xffb4 => "[KP_4]", 0xffb5 => "[KP_5]",
        0xffb6 => "[KP_6]", 0xffb7 => "[KP_7]",
        0xffb8 => "[KP_8]", 0xffb9 => "[KP_9]",
        0xff8d => "[KP_Enter]",
        0x002f => "[ForwardSlash]",
        0x005c => "[BackSlash]",
        0x0020 => "[SpaceBar]",
        _ => return None,
    };
    Some(name)
}

/// Get the unshifted base character for a shifted character on US keyboard.
pub fn get_unshifted_char(c: char) -> char {
    match c {
        '~' => '`', '!' => '1', '@' => '2', '#' => '3', '$' => '4',
        '%' => '5', '^' => '6', '&' => '7', '*' => '8', '(' => '9',
        ')' => '0', '_' => '-', '+' => '=', '{' => '[', '}' => ']',
        '|' => '\\', ':' => ';', '"' => '\'', '<' => ',', '>' => '.',
        '?' => '/',
        c if c.is_ascii_uppercase() => c.to_ascii_lowercase(),
        other => other,
    }
}

/// Convert a keysym back to the character it types, if any.
pub fn keysym_to_char(keysym: u32) -> Option<char> {
    if keysym & 0xff00_0000 == 0x0100_0000 {
        // Unicode keysym encoding
        return char::from_u32(keysym & 0x00ff_ffff);
    }
    char::from_u32(keysym)
}

/// Key as typed (shift state preserved)
pub fn logical_key(keysym: u32) -> String {
    if let Some(name) = special_key_name(keysym) {
        return name.to_string();
    }
    match keysym_to_char(keysym) {
        Some(c) => c.to_string(),
        None => format!("[0x{:x}]", keysym),
    }
}

/// Key on a US keyboard that produced this keysym
pub fn physical_key(keysym: u32) -> String {
    if let Some(name) = special_key_name(keysym) {
        return name.to_string();
    }
    match keysym_to_char(keysym) {
        Some(c) => get_unshifted_char(c).to_string(),
        None => format!("[0x{:x}]", keysym),
    }
}
