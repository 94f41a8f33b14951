//! The sliding-window compute engine.
//!
//! A COMPUTE trigger expands into the four-phase pipeline
//! `READCYCLE -> REALCOMPUTE -> POSTREAD -> WRITECYCLE` followed by the
//! trigger itself. Each time the trigger reaches a queue head it either
//! runs another buffered iteration, advances the window along the slide
//! direction with a fresh pipeline, or finalizes the pass.
//!
//! A window of `buffer_size` buffer slots covers `buffer_size / 2` kernel
//! positions (two slots per position), so a full pass emits exactly
//! `(R - kR + 1) * (C - kC + 1)` REALCOMPUTE commands for an RxC input
//! under a kRxkC kernel, whichever way it slides.

use pimsim_common::pool::RequestId;
use pimsim_common::request::{ComputeFields, OpType, Payload, Request, Slide};

use crate::controller::{MemoryController, SimCtx};

/// Iterations a window of `buffer_size` slots runs.
#[inline]
fn window_iterations(buffer_size: u64) -> u64 {
    buffer_size / 2
}

/// Tighten the column window when fewer than a full stride of positions
/// remains in the row sweep; marks the sweep complete.
fn clamp_col_window(fields: &mut ComputeFields) {
    let p = &fields.params;
    if fields.col + fields.buffer_size / 2 + p.k_col >= p.input_col + 2 {
        fields.buffer_size = 2 * (p.input_col + 2 - fields.col - p.k_col);
        fields.col_complete = true;
    }
}

/// Dual of [`clamp_col_window`] for the row direction.
fn clamp_row_window(fields: &mut ComputeFields) {
    let p = &fields.params;
    if fields.row + fields.buffer_size / 2 + p.k_row >= p.input_row + 2 {
        fields.buffer_size = 2 * (p.input_row + 2 - fields.row - p.k_row);
        fields.row_complete = true;
    }
}

fn compute_fields_mut(request: &mut Request) -> &mut ComputeFields {
    match &mut request.payload {
        Payload::Compute(fields) => fields,
        _ => unreachable!("compute op without compute payload"),
    }
}

impl MemoryController {
    /// Advance the request's physical column by `delta`, carrying into
    /// following rows. Crossing the end of the bank is a host layout bug.
    fn advance_physical(&self, request: &mut Request, delta: u64) {
        let addr = &mut request.addr;
        addr.col += delta;
        while addr.col >= self.config.cols {
            addr.col -= self.config.cols;
            addr.row += 1;
            assert!(
                addr.row < self.config.rows,
                "compute window crossed a bank boundary at row {}",
                addr.row
            );
        }
        addr.subarray = self.decoder.subarray_of_row(addr.row);
        request.phys_addr = self.decoder.reverse(addr);
    }

    /// Rebase the request's physical address onto the input base plus a
    /// flat column offset.
    fn rebase_physical(&self, request: &mut Request, offset: u64) {
        let base = match &request.payload {
            Payload::Compute(fields) => fields.input,
            _ => unreachable!("compute op without compute payload"),
        };
        request.addr = base;
        self.advance_physical(request, offset);
    }

    /// Initial expansion of a freshly selected COMPUTE trigger: reset the
    /// window cursor, clamp the first window and append the four-phase
    /// pipeline. The caller appends the trigger itself afterwards.
    pub(crate) fn expand_compute_trigger(
        &mut self,
        id: RequestId,
        qid: usize,
        ctx: &mut SimCtx<'_>,
    ) {
        let now = ctx.events.current_cycle();
        {
            let request = ctx.pool.get_mut(id);
            let fields = compute_fields_mut(request);
            fields.cycle_n = 0;
            fields.row = 1;
            fields.col = 1;
            fields.is_reused = false;
            fields.is_buffer = false;
            fields.col_complete = false;
            fields.row_complete = false;
            fields.buffer_size = fields.params.buffer_n;
            let p = fields.params;
            match fields.slide {
                Slide::X => {
                    clamp_col_window(fields);
                    if fields.row + p.k_row >= p.input_row + 1 {
                        fields.row_complete = true;
                    }
                }
                Slide::Y => {
                    clamp_row_window(fields);
                    if fields.col + p.k_col >= p.input_col + 1 {
                        fields.col_complete = true;
                    }
                }
            }
            fields.buffer_n = window_iterations(fields.buffer_size);
        }

        let template = ctx.pool.get(id).clone();
        for op in [
            OpType::ReadCycle,
            OpType::RealCompute,
            OpType::PostRead,
            OpType::WriteCycle,
        ] {
            let phase = self.make_compute_phase(&template, op, now);
            let phase_id = ctx.pool.alloc(phase);
            self.queues.push_back(qid, phase_id);
        }

        compute_fields_mut(ctx.pool.get_mut(id)).is_buffer = true;
    }

    /// One engine step for the COMPUTE trigger at the head of `qid`.
    ///
    /// Returns the id now at the queue head, ready to be issued: a fresh
    /// controller-owned COMPUTE step during iteration, or the trigger
    /// itself on the finalizing step.
    pub(crate) fn advance_compute(&mut self, qid: usize, ctx: &mut SimCtx<'_>) -> RequestId {
        let trigger = self
            .queues
            .head(qid)
            .expect("compute advance on an empty queue");
        let (buffer_n, slide, col_complete, row_complete) = {
            let request = ctx.pool.get(trigger);
            match &request.payload {
                Payload::Compute(f) => (f.buffer_n, f.slide, f.col_complete, f.row_complete),
                _ => unreachable!("compute op without compute payload"),
            }
        };

        if buffer_n > 1 {
            return self.compute_inner_iteration(trigger, qid, ctx);
        }

        match slide {
            Slide::X if !col_complete => self.compute_window_shift(trigger, qid, ctx, Slide::X),
            Slide::X if !row_complete => self.compute_outer_step(trigger, qid, ctx, Slide::X),
            Slide::Y if !row_complete => self.compute_window_shift(trigger, qid, ctx, Slide::Y),
            Slide::Y if !col_complete => self.compute_outer_step(trigger, qid, ctx, Slide::Y),
            _ => {
                // Both sweeps exhausted: the trigger itself goes to the
                // device as the pass-final step.
                compute_fields_mut(ctx.pool.get_mut(trigger)).is_buffer = false;
                trigger
            }
        }
    }

    /// Inner buffer loop: re-front a fresh COMPUTE step, append another
    /// REALCOMPUTE/POSTREAD/WRITECYCLE round, decrement the iteration
    /// count and recycle the trigger to the back.
    fn compute_inner_iteration(
        &mut self,
        trigger: RequestId,
        qid: usize,
        ctx: &mut SimCtx<'_>,
    ) -> RequestId {
        let now = ctx.events.current_cycle();
        self.queues.pop_front(qid);

        let template = ctx.pool.get(trigger).clone();
        let step = self.make_compute_phase(&template, OpType::Compute, now);
        let step_id = ctx.pool.alloc(step);
        self.queues.push_front(qid, step_id);

        for op in [OpType::RealCompute, OpType::PostRead, OpType::WriteCycle] {
            let phase = self.make_compute_phase(&template, op, now);
            let phase_id = ctx.pool.alloc(phase);
            self.queues.push_back(qid, phase_id);
        }

        compute_fields_mut(ctx.pool.get_mut(trigger)).buffer_n -= 1;
        self.queues.push_back(qid, trigger);
        step_id
    }

    /// Shift the window one stride along the slide direction and emit a
    /// full pipeline for it; the row stays logically open (`is_reused`).
    fn compute_window_shift(
        &mut self,
        trigger: RequestId,
        qid: usize,
        ctx: &mut SimCtx<'_>,
        slide: Slide,
    ) -> RequestId {
        let now = ctx.events.current_cycle();

        // The step issued this cycle closes the old window.
        compute_fields_mut(ctx.pool.get_mut(trigger)).is_buffer = false;
        self.queues.pop_front(qid);
        let closing = {
            let template = ctx.pool.get(trigger).clone();
            let step = self.make_compute_phase(&template, OpType::Compute, now);
            ctx.pool.alloc(step)
        };
        self.queues.push_front(qid, closing);

        {
            let request = ctx.pool.get_mut(trigger);
            let stride = {
                let fields = compute_fields_mut(request);
                let stride = fields.buffer_size / 2;
                match slide {
                    Slide::X => fields.col += stride,
                    Slide::Y => fields.row += stride,
                }
                fields.buffer_size = fields.params.buffer_n;
                match slide {
                    Slide::X => clamp_col_window(fields),
                    Slide::Y => clamp_row_window(fields),
                }
                fields.buffer_n = window_iterations(fields.buffer_size);
                fields.is_reused = true;
                stride
            };
            match slide {
                // Walk the open row further along the columns.
                Slide::X => self.advance_physical(request, stride),
                // Step down whole input rows from the base.
                Slide::Y => {
                    let (row, col, input_col) = {
                        let fields = compute_fields_mut(request);
                        (fields.row, fields.col, fields.params.input_col)
                    };
                    self.rebase_physical(request, (row - 1) * input_col + (col - 1));
                }
            }
        }

        self.emit_window_pipeline(trigger, qid, ctx);
        self.queues.push_back(qid, trigger);
        closing
    }

    /// Finish the inner sweep and start the next outer step: next row for
    /// slide X, next column for slide Y.
    fn compute_outer_step(
        &mut self,
        trigger: RequestId,
        qid: usize,
        ctx: &mut SimCtx<'_>,
        slide: Slide,
    ) -> RequestId {
        let now = ctx.events.current_cycle();

        compute_fields_mut(ctx.pool.get_mut(trigger)).is_buffer = false;
        self.queues.pop_front(qid);
        let closing = {
            let template = ctx.pool.get(trigger).clone();
            let step = self.make_compute_phase(&template, OpType::Compute, now);
            ctx.pool.alloc(step)
        };
        self.queues.push_front(qid, closing);

        {
            let request = ctx.pool.get_mut(trigger);
            let offset = {
                let fields = compute_fields_mut(request);
                let p = fields.params;
                match slide {
                    Slide::X => {
                        fields.col_complete = false;
                        fields.col = 1;
                        fields.row += 1;
                        fields.buffer_size = p.buffer_n;
                        clamp_col_window(fields);
                        if fields.row + p.k_row >= p.input_row + 1 {
                            fields.row_complete = true;
                        }
                    }
                    Slide::Y => {
                        fields.row_complete = false;
                        fields.row = 1;
                        fields.col += 1;
                        fields.buffer_size = p.buffer_n;
                        clamp_row_window(fields);
                        if fields.col + p.k_col >= p.input_col + 1 {
                            fields.col_complete = true;
                        }
                    }
                }
                fields.buffer_n = window_iterations(fields.buffer_size);
                fields.is_reused = false;
                (fields.row - 1) * p.input_col + (fields.col - 1)
            };
            self.rebase_physical(request, offset);
        }

        self.emit_window_pipeline(trigger, qid, ctx);
        self.queues.push_back(qid, trigger);
        closing
    }

    /// ACTIVATE plus the four phases for a freshly positioned window, then
    /// mark the trigger buffering again.
    fn emit_window_pipeline(&mut self, trigger: RequestId, qid: usize, ctx: &mut SimCtx<'_>) {
        let now = ctx.events.current_cycle();
        let template = ctx.pool.get(trigger).clone();

        let activate = self.make_activate(&template, now);
        let activate_id = ctx.pool.alloc(activate);
        self.queues.push_back(qid, activate_id);

        for op in [
            OpType::ReadCycle,
            OpType::RealCompute,
            OpType::PostRead,
            OpType::WriteCycle,
        ] {
            let phase = self.make_compute_phase(&template, op, now);
            let phase_id = ctx.pool.alloc(phase);
            self.queues.push_back(qid, phase_id);
        }

        compute_fields_mut(ctx.pool.get_mut(trigger)).is_buffer = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pimsim_common::compute_params::ComputeParams;

    fn fields(input: u64, kernel: u64, buffer: u64) -> ComputeFields {
        let params = ComputeParams {
            input_row: input,
            input_col: input,
            k_row: kernel,
            k_col: kernel,
            buffer_n: buffer,
            ..Default::default()
        };
        let mut f = ComputeFields::new(0, Default::default(), 0, Default::default(), Slide::X, params);
        f.buffer_size = buffer;
        f
    }

    #[test]
    fn full_width_window_is_tightened() {
        // Window at col 3 of a 5-wide input under a 3x3 kernel: one
        // position remains.
        let mut f = fields(5, 3, 4);
        f.col = 3;
        clamp_col_window(&mut f);
        assert!(f.col_complete);
        assert_eq!(f.buffer_size, 2);
        assert_eq!(window_iterations(f.buffer_size), 1);
    }

    #[test]
    fn first_window_of_wide_input_is_untouched() {
        let mut f = fields(28, 3, 8);
        clamp_col_window(&mut f);
        assert!(!f.col_complete);
        assert_eq!(f.buffer_size, 8);
    }

    #[test]
    fn exactly_fitting_window_completes_the_sweep() {
        // 6-wide input, 3-wide kernel: 4 positions; a window at col 3 with
        // stride 2 covers exactly the last two.
        let mut f = fields(6, 3, 4);
        f.col = 3;
        clamp_col_window(&mut f);
        assert!(f.col_complete);
        assert_eq!(f.buffer_size, 4);
    }

    #[test]
    fn row_clamp_mirrors_col_clamp() {
        let mut f = fields(5, 3, 4);
        f.row = 3;
        clamp_row_window(&mut f);
        assert!(f.row_complete);
        assert_eq!(f.buffer_size, 2);
    }
}
