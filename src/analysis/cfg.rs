// Tue Jan 13 2026 - Alex

use crate::analysis::disassembler::{DecodedInstruction, Disassembler};
use crate::analysis::DisasmError;
use crate::memory::Address;
use iced_x86::FlowControl;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    entry: Address,
    blocks: BTreeMap<u64, CfgBlock>,
    exit_blocks: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct CfgBlock {
    pub start: Address,
    pub end: Address,
    pub instructions: Vec<DecodedInstruction>,
    pub successors: Vec<Address>,
}

impl CfgBlock {
    pub fn contains(&self, addr: Address) -> bool {
        self.instructions.iter().any(|i| i.address == addr)
    }

    pub fn last(&self) -> Option<&DecodedInstruction> {
        self.instructions.last()
    }
}

impl ControlFlowGraph {
    /// Recursive descent from `entry`; anything outside `[entry, entry + max_size)` is ignored.
    pub fn build(disasm: &Disassembler, entry: Address, max_size: usize) -> Result<Self, DisasmError> {
        let limit = entry + max_size as u64;
        let mut blocks = BTreeMap::new();
        let mut exit_blocks = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        queue.push_back(entry);

        while let Some(block_start) = queue.pop_front() {
            if visited.contains(&block_start.as_u64()) {
                continue;
            }
            if block_start < entry || block_start >= limit {
                continue;
            }

            visited.insert(block_start.as_u64());

            let mut instructions = Vec::new();
            let mut successors = Vec::new();
            let mut current = block_start;
            let mut is_exit = false;

            loop {
                if current >= limit {
                    break;
                }

                let instr = disasm.disassemble(current)?;
                let next = instr.next_address();

                match instr.flow_control() {
                    FlowControl::Return | FlowControl::Interrupt | FlowControl::Exception => {
                        instructions.push(instr);
                        is_exit = true;
                        break;
                    }
                    FlowControl::UnconditionalBranch => {
                        if let Some(target) = instr.branch_target() {
                            successors.push(target);
                            queue.push_back(target);
                        }
                        instructions.push(instr);
                        break;
                    }
                    FlowControl::ConditionalBranch => {
                        if let Some(target) = instr.branch_target() {
                            successors.push(target);
                            queue.push_back(target);
                        }
                        successors.push(next);
                        queue.push_back(next);
                        instructions.push(instr);
                        break;
                    }
                    // Jump tables are not followed.
                    FlowControl::IndirectBranch => {
                        instructions.push(instr);
                        is_exit = true;
                        break;
                    }
                    _ => {
                        instructions.push(instr);
                        current = next;

                        if visited.contains(&current.as_u64()) {
                            successors.push(current);
                            break;
                        }
                    }
                }
            }

            let block_end = match instructions.last() {
                Some(last) => last.address,
                None => block_start,
            };

            if is_exit {
                exit_blocks.push(block_start.as_u64());
            }

            blocks.insert(
                block_start.as_u64(),
                CfgBlock {
                    start: block_start,
                    end: block_end,
                    instructions,
                    successors,
                },
            );
        }

        log::trace!("CFG for {}: {} blocks", entry, blocks.len());

        Ok(Self {
            entry,
            blocks,
            exit_blocks,
        })
    }

    pub fn entry(&self) -> Address {
        self.entry
    }

    pub fn block(&self, start: Address) -> Option<&CfgBlock> {
        self.blocks.get(&start.as_u64())
    }

    pub fn blocks(&self) -> impl Iterator<Item = &CfgBlock> {
        self.blocks.values()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn exit_blocks(&self) -> impl Iterator<Item = &CfgBlock> {
        self.exit_blocks.iter().filter_map(|s| self.blocks.get(s))
    }

    pub fn block_containing(&self, addr: Address) -> Option<&CfgBlock> {
        self.blocks.values().find(|b| b.contains(addr))
    }

    /// Every decoded instruction once, in address order.
    pub fn instructions(&self) -> Vec<&DecodedInstruction> {
        self.blocks
            .values()
            .flat_map(|b| b.instructions.iter())
            .unique_by(|i| i.address.as_u64())
            .sorted_by_key(|i| i.address)
            .collect()
    }

    /// Shortest block path from the entry to a block holding `target`.
    pub fn find_path(&self, target: Address) -> Option<Vec<Address>> {
        let mut parents: HashMap<u64, u64> = HashMap::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        queue.push_back(self.entry.as_u64());
        visited.insert(self.entry.as_u64());

        while let Some(current) = queue.pop_front() {
            let block = match self.blocks.get(&current) {
                Some(b) => b,
                None => continue,
            };

            if block.contains(target) {
                let mut path = vec![Address::new(current)];
                let mut node = current;
                while let Some(&parent) = parents.get(&node) {
                    path.push(Address::new(parent));
                    node = parent;
                }
                path.reverse();
                return Some(path);
            }

            for succ in &block.successors {
                if visited.insert(succ.as_u64()) {
                    parents.insert(succ.as_u64(), current);
                    queue.push_back(succ.as_u64());
                }
            }
        }

        None
    }
}
