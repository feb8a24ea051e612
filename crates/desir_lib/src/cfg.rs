//! Basic-block partitioning of a decoded statement stream.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ast::{Anchored, Stmt};
use crate::error::DesirError;

/// A run of statements `stmts[start..end]` of the stream the graph was
/// built from. Successors are block indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub leader: u32,
    pub start: usize,
    pub end: usize,
    pub fallthrough: Option<usize>,
    pub branch: Option<usize>,
}

impl BasicBlock {
    pub fn statements<'s>(&self, stream: &'s [Anchored<Stmt>]) -> &'s [Anchored<Stmt>] {
        &stream[self.start..self.end]
    }

    pub fn successors(&self) -> impl Iterator<Item = usize> {
        self.fallthrough.into_iter().chain(self.branch)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
    /// Sorted, deduplicated block start addresses. `leaders[i]` starts `blocks[i]`.
    pub leaders: Vec<u32>,
}

impl ControlFlowGraph {
    pub fn build(
        stmts: &[Anchored<Stmt>],
        entries: impl IntoIterator<Item = u32>,
    ) -> Result<Self, DesirError> {
        let leaders = collect_leaders(stmts, entries);
        let mut blocks = partition(stmts, &leaders)?;

        for bi in 0..blocks.len() {
            let last = &stmts[blocks[bi].end - 1];
            let fallthrough = || {
                if bi + 1 < leaders.len() {
                    Ok(bi + 1)
                } else {
                    Err(DesirError::MissingFallthrough { block: bi, offset: last.offset })
                }
            };
            let (ft, br) = match &last.node {
                Stmt::CondBranch { target, .. } => (Some(fallthrough()?), Some(resolve(&leaders, bi, *target)?)),
                Stmt::Branch { target } => (None, Some(resolve(&leaders, bi, *target)?)),
                Stmt::ScopeClose | Stmt::EndOfFile => (None, None),
                _ => (Some(fallthrough()?), None),
            };
            blocks[bi].fallthrough = ft;
            blocks[bi].branch = br;
        }

        log::debug!("cfg: {} blocks", blocks.len());
        Ok(Self { blocks, leaders })
    }

    /// Index of the block starting exactly at `address`.
    pub fn block_at(&self, address: u32) -> Option<usize> {
        self.leaders.binary_search(&address).ok()
    }
}

/// Entries, branch targets, and the statement after every conditional branch.
/// An unconditional branch does not make its successor a leader.
fn collect_leaders(stmts: &[Anchored<Stmt>], entries: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut leaders: BTreeSet<u32> = entries.into_iter().collect();
    for (i, s) in stmts.iter().enumerate() {
        if let Some(t) = s.node.branch_target() {
            leaders.insert(t);
            if s.node.is_conditional_branch() {
                if let Some(next) = stmts.get(i + 1) {
                    leaders.insert(next.offset);
                }
            }
        }
    }
    leaders.into_iter().collect()
}

fn partition(stmts: &[Anchored<Stmt>], leaders: &[u32]) -> Result<Vec<BasicBlock>, DesirError> {
    let mut blocks = Vec::with_capacity(leaders.len());
    let mut idx = 0usize;
    for (bi, &leader) in leaders.iter().enumerate() {
        if stmts.get(idx).map(|s| s.offset) != Some(leader) {
            return Err(DesirError::LeaderNotAStatement { leader });
        }
        let start = idx;
        let next_leader = leaders.get(bi + 1).copied();
        // The final block stops before the end-of-file marker.
        while let Some(s) = stmts.get(idx) {
            let stop = match next_leader {
                Some(n) => s.offset >= n,
                None => matches!(s.node, Stmt::EndOfFile),
            };
            if stop {
                break;
            }
            idx += 1;
        }
        if idx == start {
            return Err(DesirError::EmptyBlock { leader });
        }
        blocks.push(BasicBlock {
            leader,
            start,
            end: idx,
            fallthrough: None,
            branch: None,
        });
    }
    Ok(blocks)
}

fn resolve(leaders: &[u32], block: usize, target: u32) -> Result<usize, DesirError> {
    leaders
        .binary_search(&target)
        .map_err(|i| DesirError::DanglingBranchTarget {
            block,
            target,
            nearest: leaders.get(i).copied(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BranchPolarity, Expr};
    use test_log::test;

    fn at(offset: u32, node: Stmt) -> Anchored<Stmt> {
        Anchored::new(offset, node)
    }

    fn unless(target: u32) -> Stmt {
        Stmt::CondBranch {
            cond: Expr::Int(1),
            target,
            polarity: BranchPolarity::IfFalse,
        }
    }

    fn expr_stmt() -> Stmt {
        Stmt::Expr(Expr::Int(0))
    }

    fn check_invariants(stmts: &[Anchored<Stmt>], cfg: &ControlFlowGraph) {
        assert!(cfg.leaders.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(cfg.blocks.len(), cfg.leaders.len());
        for s in stmts {
            if let Some(t) = s.node.branch_target() {
                assert!(cfg.leaders.contains(&t));
            }
        }
        for (i, b) in cfg.blocks.iter().enumerate() {
            assert_eq!(b.leader, cfg.leaders[i]);
            for succ in b.successors() {
                assert!(succ < cfg.blocks.len());
            }
            if let Some(br) = b.branch {
                let last = &stmts[b.end - 1];
                assert_eq!(last.node.branch_target(), Some(cfg.blocks[br].leader));
            }
        }
    }

    #[test]
    fn conditional_branch_splits_three_ways() {
        let stmts = vec![
            at(0x10, unless(0x20)),
            at(0x16, expr_stmt()),
            at(0x20, Stmt::ScopeClose),
        ];
        let cfg = ControlFlowGraph::build(&stmts, [0x10]).unwrap();
        assert_eq!(cfg.leaders, vec![0x10, 0x16, 0x20]);
        let b = &cfg.blocks;
        assert_eq!((b[0].start, b[0].end, b[0].fallthrough, b[0].branch), (0, 1, Some(1), Some(2)));
        assert_eq!((b[1].start, b[1].end, b[1].fallthrough, b[1].branch), (1, 2, Some(2), None));
        assert_eq!((b[2].start, b[2].end, b[2].fallthrough, b[2].branch), (2, 3, None, None));
        check_invariants(&stmts, &cfg);
    }

    #[test]
    fn unconditional_branch_has_no_fallthrough_leader() {
        let stmts = vec![
            at(0x10, Stmt::ScopeOpen),
            at(0x11, Stmt::Branch { target: 0x18 }),
            at(0x14, expr_stmt()),
            at(0x18, Stmt::ScopeClose),
            at(0x19, Stmt::EndOfFile),
        ];
        let cfg = ControlFlowGraph::build(&stmts, [0x10]).unwrap();
        assert_eq!(cfg.leaders, vec![0x10, 0x18]);
        assert_eq!(cfg.blocks[0].end, 3);
        // the dead expression statement is the block's last statement
        assert_eq!(cfg.blocks[0].fallthrough, Some(1));
        assert_eq!(cfg.blocks[0].branch, None);
        // final block stops before end-of-file
        assert_eq!(cfg.blocks[1].statements(&stmts), &stmts[3..4]);
        check_invariants(&stmts, &cfg);
    }

    #[test]
    fn block_ending_in_branch_resolves_exactly() {
        let stmts = vec![
            at(0x10, Stmt::Return),
            at(0x11, Stmt::Branch { target: 0x10 }),
            at(0x14, Stmt::ScopeClose),
        ];
        let cfg = ControlFlowGraph::build(&stmts, [0x10, 0x14]).unwrap();
        assert_eq!(cfg.blocks[0].branch, Some(0));
        assert_eq!(cfg.blocks[0].fallthrough, None);
        assert_eq!(cfg.block_at(0x14), Some(1));
        assert_eq!(cfg.block_at(0x11), None);
        check_invariants(&stmts, &cfg);
    }

    #[test]
    fn branch_into_mid_statement_is_fatal() {
        let stmts = vec![
            at(0x10, expr_stmt()),
            at(0x12, Stmt::Branch { target: 0x11 }),
            at(0x15, Stmt::ScopeClose),
        ];
        let err = ControlFlowGraph::build(&stmts, [0x10]).unwrap_err();
        // 0x11 is a leader but no statement starts there
        assert!(matches!(err, DesirError::LeaderNotAStatement { leader: 0x11 }));
    }

    #[test]
    fn fallthrough_off_the_end_is_fatal() {
        let stmts = vec![at(0x10, Stmt::Return), at(0x11, Stmt::EndOfFile)];
        let err = ControlFlowGraph::build(&stmts, [0x10]).unwrap_err();
        assert!(matches!(err, DesirError::MissingFallthrough { block: 0, offset: 0x10 }));
    }

    #[test]
    fn leader_must_start_a_statement() {
        let stmts = vec![at(0x10, Stmt::ScopeOpen), at(0x11, Stmt::ScopeClose)];
        let err = ControlFlowGraph::build(&stmts, [0x12]).unwrap_err();
        assert!(matches!(err, DesirError::LeaderNotAStatement { leader: 0x12 }));
    }

    #[test]
    fn branch_to_end_of_file_leaves_empty_block() {
        let stmts = vec![at(0x10, Stmt::Branch { target: 0x13 }), at(0x13, Stmt::EndOfFile)];
        let err = ControlFlowGraph::build(&stmts, [0x10]).unwrap_err();
        assert!(matches!(err, DesirError::EmptyBlock { leader: 0x13 }));
    }

    #[test]
    fn dangling_target_reports_nearest_leader() {
        assert!(matches!(
            resolve(&[0x10, 0x20], 3, 0x18),
            Err(DesirError::DanglingBranchTarget { block: 3, target: 0x18, nearest: Some(0x20) })
        ));
    }
}
