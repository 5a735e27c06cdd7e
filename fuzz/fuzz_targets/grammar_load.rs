use ante::grammar::SymbolTable;
use honggfuzz::fuzz;

fn main() {
    loop {
        fuzz!(|data: &[u8]| {
            if let Ok(table) = SymbolTable::from_bytes(data) {
                let ids: Vec<u32> = (0..table.n_tokens() as u32).collect();
                let text = table.decode(&ids);
                let _ = table.encode(&text);
                let _ = table.render(&ids);
            }
        });
    }
}
