//! Copy-on-write byte buffer carried by sendable events.
//!
//! A [`Message`] is a stack of bytes: `push*` writes in front of what is
//! already there, `pop*` reads from the front. Bytes live in a chain of
//! reference-counted blocks; cloning a message clones the chain, never the
//! bytes. A block whose storage is held by more than one message is never
//! written in place.

mod block;
mod codec;
mod mutf8;
mod object;

pub use codec::MAX_STRING_BYTES;
pub use object::ObjectSlot;

use crate::error::MessageError;
use crate::memory::BudgetLease;
use block::Block;
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::io;

/// Free bytes reserved in front of a freshly allocated head block.
const HEAD_SLACK: usize = 64;

/// A shared head block at most this long is copied so a push can reuse its
/// slack instead of growing the chain.
const COALESCE_LIMIT: usize = 256;

#[derive(Default)]
pub struct Message {
    blocks: VecDeque<Block>,
    len: usize,
    leases: Vec<BudgetLease>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Prepends `bytes`.
    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(head) = self.blocks.front_mut()
            && head.front_slack() >= bytes.len()
            && (!head.is_shared() || head.len() <= COALESCE_LIMIT)
        {
            head.prepend(bytes);
        } else {
            self.blocks
                .push_front(Block::with_front_slack(bytes, HEAD_SLACK));
        }
        self.len += bytes.len();
    }

    /// Removes and returns the first `n` bytes.
    pub fn pop(&mut self, n: usize) -> Result<Bytes, MessageError> {
        self.ensure(n)?;
        if let Some(head) = self.blocks.front()
            && head.len() >= n
        {
            let out = Bytes::copy_from_slice(&head.as_slice()[..n]);
            self.consume(n);
            return Ok(out);
        }
        let mut out = vec![0u8; n];
        self.copy_front(&mut out);
        self.consume(n);
        Ok(out.into())
    }

    /// Fills `dst` from the front and removes those bytes.
    pub fn pop_into(&mut self, dst: &mut [u8]) -> Result<(), MessageError> {
        self.ensure(dst.len())?;
        self.copy_front(dst);
        self.consume(dst.len());
        Ok(())
    }

    /// Returns the first `n` bytes without removing them.
    pub fn peek(&self, n: usize) -> Result<Bytes, MessageError> {
        self.ensure(n)?;
        let mut out = vec![0u8; n];
        self.copy_front(&mut out);
        Ok(out.into())
    }

    pub fn peek_into(&self, dst: &mut [u8]) -> Result<(), MessageError> {
        self.ensure(dst.len())?;
        self.copy_front(dst);
        Ok(())
    }

    /// Drops the first `n` bytes.
    pub fn discard(&mut self, n: usize) -> Result<(), MessageError> {
        self.ensure(n)?;
        self.consume(n);
        Ok(())
    }

    /// Empties the message and returns every budget lease it held.
    pub fn discard_all(&mut self) {
        self.blocks.clear();
        self.len = 0;
        self.leases.clear();
    }

    /// Keeps only the first `new_len` bytes. No-op if the message is shorter.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len >= self.len {
            return;
        }
        let mut kept = 0;
        let mut keep_blocks = 0;
        for block in self.blocks.iter_mut() {
            if kept == new_len {
                break;
            }
            let take = block.len().min(new_len - kept);
            block.shorten(take);
            kept += take;
            keep_blocks += 1;
        }
        self.blocks.truncate(keep_blocks);
        self.len = new_len;
    }

    /// Splits the message: `self` keeps the first `at` bytes, the rest is
    /// returned. Storage is shared between the halves; leases stay on `self`.
    pub fn frag(&mut self, at: usize) -> Result<Message, MessageError> {
        self.ensure(at)?;
        let mut offset = 0;
        let mut idx = 0;
        while idx < self.blocks.len() && offset + self.blocks[idx].len() <= at {
            offset += self.blocks[idx].len();
            idx += 1;
        }

        let mut tail = self.blocks.split_off(idx);
        if let Some(first) = tail.front_mut()
            && offset < at
        {
            let rest = first.split_off(at - offset);
            let front = std::mem::replace(first, rest);
            self.blocks.push_back(front);
        }
        tail.retain(|b| !b.is_empty());

        let rest_len = self.len - at;
        self.len = at;
        Ok(Message {
            blocks: tail,
            len: rest_len,
            leases: Vec::new(),
        })
    }

    /// Appends `other` after the bytes of `self`, taking its leases too.
    pub fn join(&mut self, mut other: Message) {
        self.len += other.len;
        self.blocks.extend(other.blocks.drain(..));
        self.leases.append(&mut other.leases);
    }

    /// The whole content as one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out.into()
    }

    /// Contiguous pieces in order; useful for vectored writes.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.blocks.iter().map(Block::as_slice)
    }

    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        for chunk in self.chunks() {
            w.write_all(chunk)?;
        }
        Ok(())
    }

    /// Ties a budget lease to this message; it is returned when the message
    /// is discarded, dropped, or leaves the stack.
    pub fn attach_lease(&mut self, lease: BudgetLease) {
        self.leases.push(lease);
    }

    /// Returns every lease now. Returns the number of bytes released.
    pub fn release_leases(&mut self) -> usize {
        let bytes = self.leased_bytes();
        self.leases.clear();
        bytes
    }

    pub fn leased_bytes(&self) -> usize {
        self.leases.iter().map(BudgetLease::bytes).sum()
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<(), MessageError> {
        if needed > self.len {
            return Err(MessageError::EndOfData {
                needed,
                available: self.len,
            });
        }
        Ok(())
    }

    fn copy_front(&self, dst: &mut [u8]) {
        let mut filled = 0;
        for block in &self.blocks {
            if filled == dst.len() {
                break;
            }
            let take = block.len().min(dst.len() - filled);
            dst[filled..filled + take].copy_from_slice(&block.as_slice()[..take]);
            filled += take;
        }
    }

    /// Moves the front windows forward by `n` bytes; storage is untouched.
    fn consume(&mut self, mut n: usize) {
        self.len -= n;
        while n > 0 {
            let Some(head) = self.blocks.front_mut() else {
                break;
            };
            let take = head.len().min(n);
            head.advance(take);
            n -= take;
            if head.is_empty() {
                self.blocks.pop_front();
            }
        }
    }

    fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.chunks().flat_map(|c| c.iter().copied())
    }
}

impl Clone for Message {
    /// Shares every block; leases stay with the original.
    fn clone(&self) -> Self {
        Self {
            blocks: self.blocks.clone(),
            len: self.len,
            leases: Vec::new(),
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.bytes().eq(other.bytes())
    }
}

impl Eq for Message {}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len)
            .field("blocks", &self.blocks.len())
            .field("leased", &self.leased_bytes())
            .finish()
    }
}

impl From<&[u8]> for Message {
    fn from(bytes: &[u8]) -> Self {
        bytes.to_vec().into()
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        let mut msg = Message::new();
        if !bytes.is_empty() {
            msg.len = bytes.len();
            msg.blocks.push_back(Block::from_vec(bytes));
        }
        msg
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        bytes.to_vec().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBudget;

    fn block_lens(msg: &Message) -> usize {
        msg.blocks.iter().map(Block::len).sum()
    }

    #[test]
    fn clone_then_pop_leaves_original_intact() {
        let original = Message::from(vec![0x01, 0x02, 0x03]);
        let mut copy = original.clone();

        assert_eq!(copy.pop(1).unwrap().as_ref(), &[0x01]);
        assert_eq!(copy.len(), 2);
        assert_eq!(original.len(), 3);
        assert_eq!(original.peek(1).unwrap().as_ref(), &[0x01]);
    }

    #[test]
    fn push_on_shared_head_does_not_leak_into_clone() {
        let mut a = Message::new();
        a.push(&[3, 4]);
        let b = a.clone();
        a.push(&[1, 2]);
        assert_eq!(a.to_bytes().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(b.to_bytes().as_ref(), &[3, 4]);
    }

    #[test]
    fn push_reuses_head_slack() {
        let mut msg = Message::new();
        for i in 0..10u8 {
            msg.push(&[i]);
        }
        assert_eq!(msg.blocks.len(), 1);
        assert_eq!(msg.pop(3).unwrap().as_ref(), &[9, 8, 7]);
    }

    #[test]
    fn pop_across_blocks() {
        let mut msg = Message::from(vec![4, 5, 6]);
        msg.push(&[1, 2, 3]);
        assert_eq!(msg.blocks.len(), 2);
        let mut first = [0u8; 4];
        msg.pop_into(&mut first).unwrap();
        assert_eq!(first, [1, 2, 3, 4]);
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.len(), block_lens(&msg));
    }

    #[test]
    fn frag_and_join_restore_content() {
        let mut msg = Message::from(vec![1, 2]);
        msg.join(Message::from(vec![3, 4, 5]));
        assert_eq!(msg.len(), 5);

        let tail = msg.frag(3).unwrap();
        assert_eq!(msg.to_bytes().as_ref(), &[1, 2, 3]);
        assert_eq!(tail.to_bytes().as_ref(), &[4, 5]);
        assert_eq!(msg.len(), block_lens(&msg));
        assert_eq!(tail.len(), block_lens(&tail));

        msg.join(tail);
        assert_eq!(msg, Message::from(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn frag_on_block_boundary_and_ends() {
        let mut msg = Message::from(vec![1, 2]);
        msg.join(Message::from(vec![3]));
        let tail = msg.frag(2).unwrap();
        assert_eq!(tail.to_bytes().as_ref(), &[3]);

        let all = msg.frag(0).unwrap();
        assert!(msg.is_empty());
        assert_eq!(all.len(), 2);
        assert!(matches!(
            msg.frag(1),
            Err(MessageError::EndOfData { needed: 1, available: 0 })
        ));
    }

    #[test]
    fn truncate_and_discard() {
        let mut msg = Message::from(vec![1, 2, 3]);
        msg.join(Message::from(vec![4, 5]));
        msg.truncate(4);
        assert_eq!(msg.to_bytes().as_ref(), &[1, 2, 3, 4]);
        msg.truncate(10);
        assert_eq!(msg.len(), 4);

        msg.discard(3).unwrap();
        assert_eq!(msg.to_bytes().as_ref(), &[4]);
        assert!(msg.discard(2).is_err());
        assert_eq!(msg.len(), 1);
        assert_eq!(msg.blocks.len(), 1);
    }

    #[test]
    fn leases_follow_the_message() {
        let budget = MemoryBudget::new(1024);
        let mut msg = Message::from(vec![0; 16]);
        msg.attach_lease(budget.acquire(16));

        let copy = msg.clone();
        assert_eq!(copy.leased_bytes(), 0);
        assert_eq!(budget.used(), 16);

        msg.discard_all();
        assert_eq!(budget.used(), 0);
        assert!(msg.is_empty());
    }

    #[test]
    fn write_to_emits_all_chunks() {
        let mut msg = Message::from(vec![3]);
        msg.push(&[1, 2]);
        let mut out = Vec::new();
        msg.write_to(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }
}
