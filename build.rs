// Build script to compile GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

const SHADERS: [&str; 3] = [
    "shaders/particle.comp",
    "shaders/particle.vert",
    "shaders/particle.frag",
];

fn main() {
    for shader in SHADERS {
        println!("cargo:rerun-if-changed={shader}");
        compile_shader(shader, &format!("{shader}.spv"));
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    // glslc ships with the Vulkan SDK
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            println!(
                "cargo:warning=Failed to compile {}: exit code {:?}",
                input,
                status.code()
            );
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({e}), shaders were not compiled");
            println!("cargo:warning=Install the Vulkan SDK or run: glslc {input} -o {output}");
        }
    }
}
