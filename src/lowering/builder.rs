use crate::error::InternalError;
use crate::ir::{Block, BlockId, Instruction, Register, Terminator};

/// A block that may still receive instructions
#[derive(Debug)]
struct PendingBlock {
    label: &'static str,
    instructions: Vec<Instruction>,
    terminator: Option<Terminator>,
}

/// The mutable state of lowering one function
///
/// Tracks all blocks created so far, the block currently receiving instructions, and the
/// register counter. Registers are never reused within a function.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    blocks: Vec<PendingBlock>,
    current: Option<BlockId>,
    next_register: u32,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_register(&mut self) -> Register {
        let register = Register(self.next_register);
        self.next_register += 1;
        register
    }

    /// Append a new, empty block; the insertion point is left unchanged
    pub fn create_block(&mut self, label: &'static str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(PendingBlock {
            label,
            instructions: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn position_at(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current(&self) -> Option<BlockId> {
        self.current
    }

    /// Whether the current block can still receive instructions
    pub fn is_open(&self) -> bool {
        self.current
            .and_then(|id| self.blocks.get(id.0 as usize))
            .is_some_and(|block| block.terminator.is_none())
    }

    fn open_block(&mut self) -> Result<&mut PendingBlock, InternalError> {
        let id = self
            .current
            .ok_or_else(|| InternalError::new("no block to insert into"))?;
        let block = self
            .blocks
            .get_mut(id.0 as usize)
            .ok_or_else(|| InternalError::new(format!("{id} does not exist")))?;
        if block.terminator.is_some() {
            return Err(InternalError::new(format!("{id} is already terminated")));
        }
        Ok(block)
    }

    pub fn push(&mut self, instruction: Instruction) -> Result<(), InternalError> {
        self.open_block()?.instructions.push(instruction);
        Ok(())
    }

    /// Append to the entry block, even if it is already terminated
    ///
    /// Used for stack slots, which must be allocated once per call rather than once per
    /// execution of the block that needs them.
    pub fn hoist(&mut self, instruction: Instruction) -> Result<(), InternalError> {
        let entry = self
            .blocks
            .first_mut()
            .ok_or_else(|| InternalError::new("no entry block to hoist into"))?;
        entry.instructions.push(instruction);
        Ok(())
    }

    pub fn terminate(&mut self, terminator: Terminator) -> Result<(), InternalError> {
        self.open_block()?.terminator = Some(terminator);
        Ok(())
    }

    /// Hand out the finished blocks, in creation order
    pub fn finish(self) -> Result<Vec<Block>, InternalError> {
        self.blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| {
                let id = BlockId(i as u32);
                let terminator = block
                    .terminator
                    .ok_or_else(|| InternalError::new(format!("{id} has no terminator")))?;
                Ok(Block {
                    id,
                    label: block.label,
                    instructions: block.instructions,
                    terminator,
                })
            })
            .collect()
    }
}
