// vim: tw=80
//! Fan-out/fan-in of asynchronous logical commands
//!
//! Each submitted [`CmdCtx`] becomes one join record, keyed by a tag that
//! every one of its device requests carries.  Completions count the record
//! down; the context is handed back only when the count reaches zero.

use std::collections::{BTreeMap, VecDeque};

use crate::{
    command::CtxOp,
    ctx::{CmdCtx, Rejected, SubmitResult},
    transport::{Completion, ReqBody, Request, Transport},
    types::*
};

#[derive(Debug)]
struct JoinRecord {
    ctx: CmdCtx,
    /// Device requests still outstanding
    remaining: usize,
}

#[derive(Debug, Default)]
pub struct Join {
    records: BTreeMap<u64, JoinRecord>,
    /// Finished contexts that needed no device request
    ready: VecDeque<CmdCtx>,
    next_tag: u64,
}

impl Join {
    /// Submit a logical command as one batch of device requests.
    ///
    /// Either every request reaches the transport or none does.  On failure
    /// the context comes back inside the [`Rejected`] error and no record is
    /// kept.
    pub fn submit(&mut self, io: &mut dyn Transport, mut ctx: CmdCtx,
                  op: CtxOp, bodies: Vec<ReqBody>) -> SubmitResult
    {
        if bodies.is_empty() {
            return Err(Rejected::new(Error::InvalidArgument, ctx));
        }
        let tag = self.next_tag;
        let nreqs = bodies.len();
        let mut reqs = Vec::new();
        if let Err(e) = reqs.try_reserve_exact(nreqs) {
            return Err(Rejected::new(e.into(), ctx));
        }
        reqs.extend(bodies.into_iter().map(|b| Request {
            tag,
            cmd: b.cmd,
            data: b.data,
            meta: b.meta
        }));
        if let Err(e) = io.submit(reqs) {
            return Err(Rejected::new(e, ctx));
        }
        tracing::debug!(tag, ?op, nreqs, "submitted");
        self.next_tag = self.next_tag.wrapping_add(1);
        ctx.opcode = Some(op);
        self.records.insert(tag, JoinRecord { ctx, remaining: nreqs });
        Ok(())
    }

    /// Finish a logical command that required no device request.  It will be
    /// returned by the next [`reap`](Self::reap).
    pub fn complete(&mut self, mut ctx: CmdCtx, op: CtxOp) {
        ctx.opcode = Some(op);
        self.ready.push_back(ctx);
    }

    fn account(&mut self, c: Completion) -> Option<CmdCtx> {
        let Some(rec) = self.records.get_mut(&c.tag) else {
            tracing::warn!(tag = c.tag, "completion for unknown command");
            return None;
        };
        if c.ret.is_err() {
            rec.ctx.status = c.ret.status;
            rec.ctx.result = c.ret.result;
        }
        rec.remaining -= 1;
        if rec.remaining == 0 {
            self.records.remove(&c.tag).map(|rec| rec.ctx)
        } else {
            None
        }
    }

    /// Return up to `max` finished logical commands.
    ///
    /// The first drain of the transport waits for at least `min` device
    /// completions; later drains never block.  A `max` of zero is treated as
    /// one.
    pub fn reap(&mut self, io: &mut dyn Transport, min: usize, max: usize)
        -> Result<Vec<CmdCtx>>
    {
        let max = max.max(1);
        let mut done = Vec::new();
        while done.len() < max {
            match self.ready.pop_front() {
                Some(ctx) => done.push(ctx),
                None => break
            }
        }
        let mut min = min;
        while done.len() < max {
            let want = max - done.len();
            let batch = match io.get_completions(min.min(want), want) {
                Ok(batch) => batch,
                Err(e) if done.is_empty() => return Err(e),
                Err(e) => {
                    // Don't lose the contexts we've already collected
                    tracing::warn!(error = %e, "get_completions failed");
                    break;
                }
            };
            min = 0;
            let n = batch.len();
            done.extend(batch.into_iter().filter_map(|c| self.account(c)));
            if n < want {
                break;
            }
        }
        Ok(done)
    }

    /// Number of logical commands submitted but not yet reaped
    pub fn inflight(&self) -> usize {
        self.records.len() + self.ready.len()
    }
}

// LCOV_EXCL_STOP
