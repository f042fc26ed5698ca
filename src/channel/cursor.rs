use crate::error::CursorError;
use crate::protocol::{HandlerRef, Pipeline, UnitContract};

/// Walks a channel's handler slots while they can still be bound.
///
/// Handed to [`Handler::bound_neighbors`](crate::protocol::Handler::bound_neighbors)
/// during start and to [`Channel::with_cursor`](super::Channel::with_cursor)
/// before it.
pub struct ChannelCursor<'a> {
    pipeline: &'a Pipeline,
    slots: &'a mut [Option<HandlerRef>],
    pos: Option<usize>,
}

impl<'a> ChannelCursor<'a> {
    pub(crate) fn new(pipeline: &'a Pipeline, slots: &'a mut [Option<HandlerRef>]) -> Self {
        Self {
            pipeline,
            slots,
            pos: None,
        }
    }

    pub fn position(&self) -> Option<usize> {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn bottom(&mut self) {
        self.pos = (!self.slots.is_empty()).then_some(0);
    }

    pub fn top(&mut self) {
        self.pos = self.slots.len().checked_sub(1);
    }

    pub fn up(&mut self) -> Result<usize, CursorError> {
        let pos = self.current()?;
        if pos + 1 >= self.slots.len() {
            return Err(CursorError::AtTop);
        }
        self.pos = Some(pos + 1);
        Ok(pos + 1)
    }

    pub fn down(&mut self) -> Result<usize, CursorError> {
        let pos = self.current()?;
        if pos == 0 {
            return Err(CursorError::AtBottom);
        }
        self.pos = Some(pos - 1);
        Ok(pos - 1)
    }

    /// Moves `offset` positions from the current one.
    pub fn jump(&mut self, offset: isize) -> Result<usize, CursorError> {
        let pos = self.current()?;
        let target = pos as isize + offset;
        self.jump_to_signed(target)
    }

    pub fn jump_to(&mut self, pos: usize) -> Result<usize, CursorError> {
        self.jump_to_signed(pos as isize)
    }

    fn jump_to_signed(&mut self, target: isize) -> Result<usize, CursorError> {
        if target < 0 || target as usize >= self.slots.len() {
            return Err(CursorError::InvalidJump(target));
        }
        self.pos = Some(target as usize);
        Ok(target as usize)
    }

    /// Contract of the unit at the cursor.
    pub fn unit(&self) -> Result<&UnitContract, CursorError> {
        let pos = self.current()?;
        self.pipeline
            .unit(pos)
            .map(|u| u.contract())
            .ok_or(CursorError::NotPositioned)
    }

    pub fn handler(&self) -> Result<Option<&HandlerRef>, CursorError> {
        let pos = self.current()?;
        Ok(self.slots[pos].as_ref())
    }

    pub fn is_set(&self) -> Result<bool, CursorError> {
        self.handler().map(|h| h.is_some())
    }

    /// Binds `handler` at the cursor. The slot must be empty and the handler
    /// must belong to the unit at this position.
    pub fn set_handler(&mut self, handler: HandlerRef) -> Result<(), CursorError> {
        let pos = self.current()?;
        if self.slots[pos].is_some() {
            return Err(CursorError::AlreadySet(pos));
        }
        let expected = self.unit()?.name();
        if handler.unit() != expected {
            return Err(CursorError::WrongUnit {
                position: pos,
                expected: expected.to_string(),
                found: handler.unit().to_string(),
            });
        }
        self.slots[pos] = Some(handler);
        Ok(())
    }

    /// Binds a fresh handler from the unit at the cursor unless one is set.
    /// Returns the handler now bound there.
    pub fn ensure_handler(&mut self) -> Result<HandlerRef, CursorError> {
        let pos = self.current()?;
        if let Some(existing) = &self.slots[pos] {
            return Ok(existing.clone());
        }
        let unit = self.pipeline.unit(pos).ok_or(CursorError::NotPositioned)?;
        let handler = unit.create_handler();
        self.slots[pos] = Some(handler.clone());
        Ok(handler)
    }

    #[inline]
    fn current(&self) -> Result<usize, CursorError> {
        self.pos.ok_or(CursorError::NotPositioned)
    }
}
