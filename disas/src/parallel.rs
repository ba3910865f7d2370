use std::{
    io::{self, Write},
    panic,
    sync::mpsc,
    thread,
};

use crate::App;

enum Message {
    Offset(usize),
    Print,
}

struct Parallel<'a> {
    app: &'a App<'a>,
    address: u64,
    data: &'a [u8],
}

impl<'a> Parallel<'a> {
    fn new(app: &'a App<'a>, address: u64, data: &'a [u8]) -> Self {
        Self { app, address, data }
    }

    /// Returns the length of the block at `start`, the block ends on the
    /// first instruction boundary after `block_size` bytes.
    fn block_len(&self, start: usize) -> usize {
        let block_size = self.app.threads_block_size;
        let address = self.address.wrapping_add(start as u64);
        let mut len = 0;
        for (_, res) in self.app.decoder.iter(address, &self.data[start..]) {
            len += res.map_or(1, |insn| insn.len());
            if len >= block_size {
                break;
            }
        }
        len
    }

    fn disassemble_thread(
        &self,
        name: &str,
        rx: mpsc::Receiver<Message>,
        tx: mpsc::SyncSender<Message>,
    ) -> io::Result<()> {
        let mut buffer = Vec::with_capacity(8 * 1024);
        let mut block_address = 0;
        let stdout = io::stdout();

        while let Ok(msg) = rx.recv() {
            match msg {
                Message::Offset(start) => {
                    if start >= self.data.len() {
                        debug!("{name}: end of code");
                        return Ok(());
                    }

                    block_address = self.address.wrapping_add(start as u64);
                    let block_len = self.block_len(start);
                    if tx.send(Message::Offset(start + block_len)).is_err() {
                        return Ok(());
                    }

                    debug!("{name}: {block_address:#x} disassemble {block_len} bytes");

                    buffer.clear();
                    let block = &self.data[start..start + block_len];
                    self.app.print_code(&mut buffer, block_address, block)?;
                }
                Message::Print => {
                    debug!("{name}: {block_address:#x} print {} bytes", buffer.len());

                    if let Err(err) = stdout.lock().write_all(&buffer) {
                        if err.kind() == io::ErrorKind::BrokenPipe {
                            break;
                        } else {
                            return Err(err);
                        }
                    }

                    if tx.send(Message::Print).is_err() {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }

    fn disassemble_code(&self) -> io::Result<()> {
        let threads = self.app.threads;
        debug!(
            "using {threads} threads, ~{} bytes per block",
            self.app.threads_block_size
        );

        thread::scope(|s| {
            let mut tx = Vec::with_capacity(threads);
            let mut rx = Vec::with_capacity(threads);

            for _ in 0..threads {
                let (t, r) = mpsc::sync_channel::<Message>(2);
                tx.push(t);
                rx.push(r);
            }

            // the first thread starts with the first block and the print token,
            // its receiver is alive so the queue can not be disconnected
            let first = tx.remove(0);
            let _ = first.send(Message::Offset(0));
            let _ = first.send(Message::Print);
            tx.push(first);

            let handles: Vec<_> = rx
                .into_iter()
                .zip(tx)
                .enumerate()
                .map(|(id, (rx, tx))| {
                    s.spawn(move || {
                        let name = format!("thread#{id}");
                        debug!("{name}: start");
                        let res = self.disassemble_thread(&name, rx, tx);
                        debug!("{name}: exit");
                        res
                    })
                })
                .collect();

            handles
                .into_iter()
                .try_for_each(|h| h.join().unwrap_or_else(|err| panic::resume_unwind(err)))
        })
    }
}

pub fn disassemble_code(app: &App, address: u64, data: &[u8]) -> io::Result<()> {
    Parallel::new(app, address, data).disassemble_code()
}
