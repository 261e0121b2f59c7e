use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fs};

fn main() {
    let Ok(out_dir) = env::var("OUT_DIR") else {
        println!("cargo:warning=OUT_DIR is not set, not compiling shaders");
        return;
    };

    let input_path = PathBuf::from("shaders");
    println!("cargo:rerun-if-changed={}", input_path.to_string_lossy());

    let output_path = Path::new(&out_dir).join("shaders");
    if let Err(err) = fs::create_dir_all(&output_path) {
        println!("cargo:warning=Could not create {}: {err}", output_path.display());
        return;
    }

    let paths = match fs::read_dir(&input_path) {
        Ok(paths) => paths,
        Err(err) => {
            println!("cargo:warning=Could not read {}: {err}", input_path.display());
            return;
        }
    };

    compile_shaders(paths, &output_path);
}

fn compile_shaders(paths: fs::ReadDir, output_path: &Path) {
    for entry in paths {
        let entry = match entry {
            Ok(path) => path,
            Err(_) => continue,
        };
        let shader_path = entry.path();
        // Headers are only included, never compiled on their own
        if !shader_path.is_file() || shader_path.extension().map_or(false, |ext| ext == "glsl") {
            continue;
        }

        let mut output_file_name = entry.file_name();
        output_file_name.push(".spv");
        let output_file = output_path.join(&output_file_name);

        // Ray tracing shaders need SPIR-V 1.4
        let shader_compile_result = Command::new("glslc")
            .arg("--target-env=vulkan1.2")
            .arg(&shader_path)
            .arg("-o")
            .arg(&output_file)
            .status();

        match shader_compile_result {
            Ok(status) if status.success() => {}
            Ok(status) => {
                println!(
                    "cargo:warning=Shader compilation for {} failed: {}",
                    shader_path.display(),
                    status
                );
            }
            Err(err) => {
                println!(
                    "cargo:warning=Could not run glslc ({err}), {} was not compiled",
                    shader_path.display()
                );
                return;
            }
        }
    }
}
