use crossterm::terminal;

/// RAII guard that restores the terminal on drop (even on panic).
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn enable() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
